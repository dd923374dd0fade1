//! Voice orchestrator integration tests for CoolSafe.
//!
//! Drives the orchestrator end to end with scripted speech adapters: wake
//! phrase, command, close flow and the fallbacks when the kitchen is noisy.

use chrono::{TimeZone, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use coolsafe::clock::ManualClock;
use coolsafe::config::CoolingConfig;
use coolsafe::cooling::{CoolingSession, EventType, FoodCategory, SessionManager, SessionStatus};
use coolsafe::database::Database;
use coolsafe::directory::{InMemoryPresetCatalog, InMemoryStaffDirectory, StaffMember};
use coolsafe::speech::mock::{mock_speech, SpeechLog};
use coolsafe::speech::{speech_channel, CaptureError, CaptureErrorKind};
use coolsafe::voice::{
    spawn_voice, FlowPolicy, FlowStep, VoiceDevices, VoiceDirectories, VoiceHandle, VoiceNotice,
    VoiceSettings, VoiceState,
};

const SITE: &str = "main-kitchen";
const WAIT_LIMIT: Duration = Duration::from_secs(3);

struct Harness {
    _dir: TempDir,
    manager: Arc<SessionManager>,
    voice: VoiceHandle,
    task: JoinHandle<()>,
    log: SpeechLog,
    notices: broadcast::Receiver<VoiceNotice>,
    /// Capture sessions already handed out to the test
    seen_captures: usize,
}

fn staff() -> InMemoryStaffDirectory {
    InMemoryStaffDirectory::new(vec![
        StaffMember {
            id: "s1".to_string(),
            name: "Sam".to_string(),
            initials: "SM".to_string(),
            role: "chef".to_string(),
            active: true,
            code: Some(1),
        },
        StaffMember {
            id: "s2".to_string(),
            name: "Jane".to_string(),
            initials: "JD".to_string(),
            role: "sous chef".to_string(),
            active: true,
            code: Some(2),
        },
    ])
    .expect("Failed to build staff directory")
}

fn settings(step_timeout: Duration) -> VoiceSettings {
    VoiceSettings {
        speech_grace: Duration::ZERO,
        flow: FlowPolicy {
            step_timeout,
            confirm_timeout: step_timeout,
            ..FlowPolicy::default()
        },
        ..VoiceSettings::default()
    }
}

fn start_harness(settings: VoiceSettings) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let db = Arc::new(
        Database::open(&dir.path().join("coolsafe.db")).expect("Failed to open database"),
    );
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
    let manager = Arc::new(SessionManager::new(
        db,
        Arc::new(clock),
        &CoolingConfig::default(),
    ));

    let (sink, events) = speech_channel();
    let (capture, synthesizer, log) = mock_speech(sink);
    let (voice, task) = spawn_voice(
        settings,
        manager.clone(),
        VoiceDirectories {
            staff: Arc::new(staff()),
            presets: Arc::new(InMemoryPresetCatalog::default()),
        },
        VoiceDevices {
            capture: Box::new(capture),
            synthesizer: Box::new(synthesizer),
            events,
        },
        None,
    );
    let notices = voice.subscribe();

    Harness {
        _dir: dir,
        manager,
        voice,
        task,
        log,
        notices,
        seen_captures: 0,
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(WAIT_LIMIT, future).await {
        Ok(value) => value,
        Err(_) => panic!("Timed out waiting for {}", what),
    }
}

impl Harness {
    /// Waits for the orchestrator to open a new capture session
    async fn next_capture(&mut self) {
        let seen = self.seen_captures;
        let log = self.log.clone();
        wait_until("a new capture", || {
            log.capture_starts() > seen && log.active_capture().is_some()
        })
        .await;
        self.seen_captures = self.log.capture_starts();
    }

    /// Speaks a finished utterance into the next capture session
    async fn say(&mut self, text: &str) {
        self.next_capture().await;
        assert!(self.log.final_transcript(text), "No capture for {:?}", text);
    }

    async fn wait_for_state(&self, state: VoiceState) {
        let voice = self.voice.clone();
        wait_until(&format!("state {:?}", state), || {
            voice.snapshot().state == state
        })
        .await;
    }

    async fn wait_for_notice(&mut self, matches: impl Fn(&VoiceNotice) -> bool) -> VoiceNotice {
        within("a notice", async {
            loop {
                match self.notices.recv().await {
                    Ok(notice) if matches(&notice) => return notice,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("Notice channel closed"),
                }
            }
        })
        .await
    }

    async fn wait_for_speech(&self, text: &str) {
        let log = self.log.clone();
        wait_until(&format!("speech {:?}", text), || {
            log.spoken().iter().any(|spoken| spoken == text)
        })
        .await;
    }

    fn open_session(&self, item: &str, category: FoodCategory) -> CoolingSession {
        self.manager
            .start(item, category, SITE)
            .expect("Failed to start session")
    }

    async fn shutdown(self) {
        self.voice.shutdown();
        within("orchestrator shutdown", self.task)
            .await
            .expect("Orchestrator task panicked");
    }
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test]
async fn test_wake_phrase_with_command_starts_session() {
    let mut h = start_harness(settings(Duration::from_secs(10)));

    h.say("Hey chef, start cooling the bolognese sauce").await;
    h.wait_for_speech("Started cooling Bolognese Sauce.").await;

    let sessions = h.manager.active_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].item_name, "Bolognese Sauce");
    assert_eq!(sessions[0].category, FoodCategory::Sauce);
    assert_eq!(sessions[0].site_id, SITE);

    // Back to listening for the wake phrase
    h.next_capture().await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_wake_phrase_then_separate_command() {
    let mut h = start_harness(settings(Duration::from_secs(10)));

    h.say("hey chef").await;
    h.wait_for_state(VoiceState::CommandListening).await;
    h.say("start cooling rice").await;
    h.wait_for_speech("Started cooling Rice.").await;

    assert_eq!(h.manager.active_sessions().unwrap()[0].category, FoodCategory::Rice);
    h.shutdown().await;
}

#[tokio::test]
async fn test_speech_without_wake_phrase_is_ignored() {
    let mut h = start_harness(settings(Duration::from_secs(10)));

    h.say("start cooling rice").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.manager.active_sessions().unwrap().is_empty());
    assert!(h.log.spoken().is_empty());
    assert_eq!(h.voice.snapshot().state, VoiceState::WakeWordListening);
    h.shutdown().await;
}

#[tokio::test]
async fn test_discard_by_voice() {
    let mut h = start_harness(settings(Duration::from_secs(10)));
    let session = h.open_session("Tomato Soup", FoodCategory::Soup);

    h.say("hey chef discard the soup").await;
    h.wait_for_speech("Discarded Tomato Soup.").await;

    let stored = h.manager.session(&session.id).unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Discarded);
    assert!(stored.discard_reason.is_some());
    h.shutdown().await;
}

#[tokio::test]
async fn test_discard_with_no_sessions() {
    let mut h = start_harness(settings(Duration::from_secs(10)));

    h.say("hey chef discard").await;
    h.wait_for_speech("There are no active cooling sessions to discard.")
        .await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    assert!(h.manager.sessions().unwrap().is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn test_close_with_no_sessions() {
    let mut h = start_harness(settings(Duration::from_secs(10)));

    h.say("hey chef stop cooling").await;
    h.wait_for_speech("There are no active cooling sessions to close.").await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    assert!(h.voice.snapshot().flow.is_none());
    h.shutdown().await;
}

// =============================================================================
// Close flow
// =============================================================================

#[tokio::test]
async fn test_full_close_by_voice() {
    let mut h = start_harness(settings(Duration::from_secs(10)));
    let session = h.open_session("Chicken Stock", FoodCategory::Stock);

    h.say("hey chef stop cooling the chicken stock").await;
    h.wait_for_speech("Closing Chicken Stock. What is your staff number?")
        .await;
    h.wait_for_state(VoiceState::FlowListening).await;
    let flow = h.voice.snapshot().flow.expect("Flow should be running");
    assert_eq!(flow.step, FlowStep::AwaitingStaff);
    assert_eq!(flow.item_name, "Chicken Stock");

    h.say("two").await;
    h.wait_for_speech(
        "Thanks Jane. What is the temperature of the Chicken Stock? Say skip if you don't have one.",
    )
    .await;

    h.say("five").await;
    h.wait_for_speech("Close Chicken Stock, by Jane, at 5 degrees? Say confirm or cancel.")
        .await;

    h.say("confirm").await;
    h.wait_for_speech("Chicken Stock is closed.").await;

    let stored = h.manager.session(&session.id).unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Closed);
    assert_eq!(stored.end_temperature, Some(5.0));
    assert_eq!(stored.closed_by.as_deref(), Some("Jane"));
    assert_eq!(stored.closed_by_staff_id.as_deref(), Some("s2"));

    h.next_capture().await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    assert!(h.voice.snapshot().flow.is_none());
    h.shutdown().await;
}

#[tokio::test]
async fn test_stable_interim_answer_stops_capture_early() {
    let mut h = start_harness(settings(Duration::from_secs(10)));
    h.open_session("Rice", FoodCategory::Rice);

    h.say("hey chef close the rice").await;
    h.say("one").await;
    h.wait_for_speech(
        "Thanks Sam. What is the temperature of the Rice? Say skip if you don't have one.",
    )
    .await;

    h.next_capture().await;
    assert!(h.log.interim("four point"));
    assert!(h.log.interim("four point five"));
    assert!(h.log.interim("four point five"));

    h.wait_for_speech("Close Rice, by Sam, at 4.5 degrees? Say confirm or cancel.")
        .await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_cancel_mid_flow_saves_nothing() {
    let mut h = start_harness(settings(Duration::from_secs(10)));
    let session = h.open_session("Beef Stew", FoodCategory::Meat);

    h.say("hey chef stop cooling").await;
    h.say("one").await;
    h.say("cancel").await;
    h.wait_for_speech("Cancelled. Nothing was saved.").await;

    let stored = h.manager.session(&session.id).unwrap().unwrap();
    assert!(stored.is_open());
    let closed_events = h
        .manager
        .events_for(&session.id)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EventType::Closed)
        .count();
    assert_eq!(closed_events, 0);

    h.next_capture().await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_negative_confirmation_cancels() {
    let mut h = start_harness(settings(Duration::from_secs(10)));
    let session = h.open_session("Custard", FoodCategory::Dessert);

    h.say("hey chef stop cooling custard").await;
    h.say("two").await;
    h.say("skip").await;
    h.wait_for_speech("Close Custard, by Jane, with no temperature? Say confirm or cancel.")
        .await;
    h.say("no").await;
    h.wait_for_speech("Cancelled. Nothing was saved.").await;

    assert!(h.manager.session(&session.id).unwrap().unwrap().is_open());
    h.shutdown().await;
}

#[tokio::test]
async fn test_negated_confirmation_keeps_session_open() {
    let mut h = start_harness(settings(Duration::from_secs(10)));
    let session = h.open_session("Chicken Stock", FoodCategory::Stock);

    h.say("hey chef stop cooling").await;
    h.say("two").await;
    h.say("five").await;
    h.wait_for_speech("Close Chicken Stock, by Jane, at 5 degrees? Say confirm or cancel.")
        .await;
    h.say("don't save it").await;
    h.wait_for_speech("Cancelled. Nothing was saved.").await;

    let stored = h.manager.session(&session.id).unwrap().unwrap();
    assert!(stored.is_open());
    assert!(stored.end_temperature.is_none());
    assert!(h
        .manager
        .events_for(&session.id)
        .unwrap()
        .iter()
        .all(|e| e.event_type != EventType::Closed));
    h.shutdown().await;
}

#[tokio::test]
async fn test_unrecognised_answers_fall_back_to_screen() {
    let mut h = start_harness(settings(Duration::from_secs(10)));
    let session = h.open_session("Pulled Pork", FoodCategory::Meat);

    h.say("hey chef stop cooling").await;
    h.say("banana").await;
    h.wait_for_speech(
        "I couldn't find that staff number. Closing Pulled Pork. What is your staff number?",
    )
    .await;
    h.say("ninety nine").await;
    h.say("banana").await;

    let notice = h
        .wait_for_notice(|n| matches!(n, VoiceNotice::ManualFallback { .. }))
        .await;
    match notice {
        VoiceNotice::ManualFallback { context } => {
            assert_eq!(context.session_id, session.id);
            assert_eq!(context.item_name, "Pulled Pork");
            assert!(context.staff_name.is_none());
        }
        other => panic!("Unexpected notice {:?}", other),
    }
    h.wait_for_speech("Please finish closing Pulled Pork on screen.")
        .await;
    assert!(h.manager.session(&session.id).unwrap().unwrap().is_open());

    h.next_capture().await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_silence_times_out_to_manual_fallback() {
    let mut h = start_harness(settings(Duration::from_millis(40)));
    let session = h.open_session("Fish Pie", FoodCategory::Seafood);

    h.say("hey chef stop cooling").await;

    let notice = h
        .wait_for_notice(|n| matches!(n, VoiceNotice::ManualFallback { .. }))
        .await;
    assert!(matches!(notice, VoiceNotice::ManualFallback { .. }));
    assert!(h
        .log
        .spoken()
        .iter()
        .any(|s| s.starts_with("Sorry, I didn't hear that.")));
    assert!(h.manager.session(&session.id).unwrap().unwrap().is_open());
    h.shutdown().await;
}

// =============================================================================
// Device failures and control
// =============================================================================

#[tokio::test]
async fn test_permission_denied_disables_voice() {
    let mut h = start_harness(settings(Duration::from_secs(10)));

    h.next_capture().await;
    assert!(h.log.error(CaptureError::new(
        CaptureErrorKind::PermissionDenied,
        "microphone blocked"
    )));

    let notice = h
        .wait_for_notice(|n| matches!(n, VoiceNotice::VoiceDisabled { .. }))
        .await;
    assert!(matches!(notice, VoiceNotice::VoiceDisabled { .. }));
    let voice = h.voice.clone();
    wait_until("voice disabled", || !voice.snapshot().enabled).await;
    assert_eq!(h.voice.snapshot().state, VoiceState::Idle);

    h.voice.enable();
    h.next_capture().await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_unacknowledged_stop_does_not_stall_flow() {
    let mut voice_settings = settings(Duration::from_secs(10));
    voice_settings.stop_watchdog = Duration::from_millis(50);
    let mut h = start_harness(voice_settings);
    h.log.set_auto_ack_stop(false);
    let session = h.open_session("Chicken Stock", FoodCategory::Stock);

    h.say("hey chef stop cooling").await;
    h.wait_for_speech("Closing Chicken Stock. What is your staff number?")
        .await;
    h.wait_for_state(VoiceState::FlowListening).await;

    h.say("two").await;
    h.say("five").await;
    h.say("confirm").await;
    h.wait_for_speech("Chicken Stock is closed.").await;

    let stored = h.manager.session(&session.id).unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Closed);
    h.next_capture().await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_no_speech_restarts_wake_listening() {
    let mut h = start_harness(settings(Duration::from_secs(10)));

    h.next_capture().await;
    assert!(h
        .log
        .error(CaptureError::new(CaptureErrorKind::NoSpeech, "silence")));

    h.next_capture().await;
    assert!(h.voice.snapshot().enabled);
    h.shutdown().await;
}

#[tokio::test]
async fn test_handle_cancel_abandons_flow() {
    let mut h = start_harness(settings(Duration::from_secs(10)));
    let session = h.open_session("Gravy", FoodCategory::Sauce);

    h.say("hey chef stop cooling").await;
    h.wait_for_state(VoiceState::FlowListening).await;
    h.voice.cancel();

    h.next_capture().await;
    h.wait_for_state(VoiceState::WakeWordListening).await;
    assert!(h.voice.snapshot().flow.is_none());
    assert!(h.manager.session(&session.id).unwrap().unwrap().is_open());
    h.shutdown().await;
}

#[tokio::test]
async fn test_disable_stops_listening() {
    let mut h = start_harness(settings(Duration::from_secs(10)));

    h.next_capture().await;
    h.voice.disable();
    let voice = h.voice.clone();
    wait_until("voice idle", || {
        let snapshot = voice.snapshot();
        !snapshot.enabled && snapshot.state == VoiceState::Idle
    })
    .await;
    assert!(h.log.active_capture().is_none());
    h.shutdown().await;
}
