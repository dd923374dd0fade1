//! Voice orchestrator
//!
//! Actor task that owns the voice state machine, the microphone and the
//! synthesizer. Callers talk to it through a [`VoiceHandle`]; speech adapters
//! report through a [`SpeechSink`](crate::speech::SpeechSink). Side effects
//! are queued and only performed while no capture is running or stopping
//! and nothing is being spoken, so the microphone never hears the
//! synthesizer and two captures never overlap.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::capture::{CaptureArbiter, CaptureOwner};
use super::flow::{resolve_target, CloseFlow, FlowContext, FlowOutcome, FlowPolicy, FlowStatus};
use super::interpreter::{CommandInterpreter, VoiceCommand};
use super::listener::{ListenerAction, WakeOutcome, WakeWordListener};
use super::state::{VoiceEvent, VoiceState, VoiceStateMachine};
use crate::config::{Config, ListenerConfig};
use crate::cooling::{Alert, SessionManager};
use crate::directory::{PresetCatalog, StaffDirectory};
use crate::speech::{
    CaptureError, CaptureEvent, CaptureSessionId, SpeechCapture, SpeechEvent, SpeechSynthesizer,
    UtteranceId,
};

const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Reason recorded on sessions discarded by voice
const VOICE_DISCARD_REASON: &str = "Discarded by voice";

const FAILURE_SPEECH: &str = "Sorry, something went wrong. Please use the screen.";

/// Runtime settings for the orchestrator
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    /// Enable voice control as soon as the task starts
    pub enabled: bool,
    pub wake_phrases: Vec<String>,
    pub command_timeout: Duration,
    pub speech_grace: Duration,
    pub speech_watchdog: Duration,
    pub stop_watchdog: Duration,
    /// Site stamped on sessions started by voice
    pub site_id: String,
    pub listener: ListenerConfig,
    pub flow: FlowPolicy,
}

impl VoiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.voice.enabled,
            wake_phrases: config.voice.wake_phrases.clone(),
            command_timeout: Duration::from_secs(config.voice.command_timeout_secs),
            speech_grace: Duration::from_millis(config.flow.speech_grace_ms),
            speech_watchdog: Duration::from_secs(config.flow.speech_watchdog_secs),
            stop_watchdog: Duration::from_millis(config.flow.stop_ack_timeout_ms),
            site_id: config.general.site_id.clone(),
            listener: config.listener.clone(),
            flow: FlowPolicy::from_config(&config.flow, &config.cooling),
        }
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Speech adapters and the channel they report on
pub struct VoiceDevices {
    pub capture: Box<dyn SpeechCapture>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    pub events: mpsc::UnboundedReceiver<SpeechEvent>,
}

/// Lookups the orchestrator needs besides the session manager
#[derive(Clone)]
pub struct VoiceDirectories {
    pub staff: Arc<dyn StaffDirectory>,
    pub presets: Arc<dyn PresetCatalog>,
}

/// What the presentation layer renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSnapshot {
    pub state: VoiceState,
    pub description: String,
    pub enabled: bool,
    pub flow: Option<FlowStatus>,
}

impl Default for VoiceSnapshot {
    fn default() -> Self {
        Self {
            state: VoiceState::Idle,
            description: VoiceState::Idle.description().to_string(),
            enabled: false,
            flow: None,
        }
    }
}

/// One-off events for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceNotice {
    /// A wake phrase showed up in an interim transcript
    WakeHeard,
    Spoke { text: String },
    /// The close flow gave up; finish on screen with what was collected
    ManualFallback { context: FlowContext },
    FridgeLogRequested { fridge: Option<u32> },
    AlertRaised { alert: Alert },
    VoiceDisabled { reason: String },
}

#[derive(Debug)]
enum VoiceMessage {
    Enable,
    Disable,
    Cancel,
    Timer { token: u64 },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    CommandTimeout,
    StepTimeout,
    SpeechWatchdog,
    /// Capture session whose stop has not been acknowledged
    StopWatchdog(CaptureSessionId),
    Grace,
    ListenerRestart,
}

#[derive(Debug, Clone, PartialEq)]
enum Effect {
    Speak(String),
    Listen(CaptureOwner),
}

/// Cloneable handle to the orchestrator task
#[derive(Clone)]
pub struct VoiceHandle {
    tx: mpsc::UnboundedSender<VoiceMessage>,
    snapshot: watch::Receiver<VoiceSnapshot>,
    notices: broadcast::Sender<VoiceNotice>,
}

impl VoiceHandle {
    pub fn enable(&self) {
        self.send(VoiceMessage::Enable);
    }

    pub fn disable(&self) {
        self.send(VoiceMessage::Disable);
    }

    /// Abandons whatever is in progress without committing it
    pub fn cancel(&self) {
        self.send(VoiceMessage::Cancel);
    }

    pub fn shutdown(&self) {
        self.send(VoiceMessage::Shutdown);
    }

    pub fn snapshot(&self) -> VoiceSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn watch(&self) -> watch::Receiver<VoiceSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceNotice> {
        self.notices.subscribe()
    }

    fn send(&self, message: VoiceMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("Voice orchestrator is gone");
        }
    }
}

/// Spawns the orchestrator task
///
/// `alerts` forwards status-monitor alerts to the notice stream.
pub fn spawn_voice(
    settings: VoiceSettings,
    manager: Arc<SessionManager>,
    directories: VoiceDirectories,
    devices: VoiceDevices,
    alerts: Option<broadcast::Receiver<Alert>>,
) -> (VoiceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(VoiceSnapshot::default());
    let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

    let VoiceDevices {
        capture,
        synthesizer,
        events,
    } = devices;

    let orchestrator = VoiceOrchestrator {
        listener: WakeWordListener::new(&settings.wake_phrases, &settings.listener),
        interpreter: CommandInterpreter::new(directories.presets),
        staff: directories.staff,
        settings,
        manager,
        capture,
        synthesizer,
        machine: VoiceStateMachine::new(),
        arbiter: CaptureArbiter::new(),
        flow: None,
        enabled: false,
        effects: VecDeque::new(),
        speaking: None,
        next_utterance: 1,
        grace_pending: false,
        timers: HashMap::new(),
        next_timer: 1,
        early_answer: None,
        timer_tx: tx.downgrade(),
        snapshot_tx,
        notices: notices.clone(),
    };

    let task = tokio::spawn(orchestrator.run(rx, events, alerts));
    let handle = VoiceHandle {
        tx,
        snapshot: snapshot_rx,
        notices,
    };
    (handle, task)
}

async fn next_alert(alerts: &mut Option<broadcast::Receiver<Alert>>) -> Option<Alert> {
    let Some(rx) = alerts.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(alert) => return Some(alert),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Voice orchestrator missed {} alerts", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

struct VoiceOrchestrator {
    settings: VoiceSettings,
    manager: Arc<SessionManager>,
    staff: Arc<dyn StaffDirectory>,
    interpreter: CommandInterpreter,
    capture: Box<dyn SpeechCapture>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    machine: VoiceStateMachine,
    listener: WakeWordListener,
    arbiter: CaptureArbiter,
    flow: Option<CloseFlow>,
    enabled: bool,
    effects: VecDeque<Effect>,
    speaking: Option<UtteranceId>,
    next_utterance: UtteranceId,
    grace_pending: bool,
    timers: HashMap<u64, TimerKind>,
    next_timer: u64,
    /// Interim answer that stopped a flow capture early
    early_answer: Option<(CaptureSessionId, String)>,
    timer_tx: mpsc::WeakUnboundedSender<VoiceMessage>,
    snapshot_tx: watch::Sender<VoiceSnapshot>,
    notices: broadcast::Sender<VoiceNotice>,
}

impl VoiceOrchestrator {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<VoiceMessage>,
        mut speech_rx: mpsc::UnboundedReceiver<SpeechEvent>,
        mut alerts: Option<broadcast::Receiver<Alert>>,
    ) {
        tracing::info!("Voice orchestrator started");
        if self.settings.enabled {
            self.enable();
            self.pump();
        }
        self.publish();

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(VoiceMessage::Shutdown) | None => break,
                    Some(message) => self.handle_message(message),
                },
                Some(event) = speech_rx.recv() => self.handle_speech(event),
                alert = next_alert(&mut alerts) => match alert {
                    Some(alert) => self.notify(VoiceNotice::AlertRaised { alert }),
                    None => alerts = None,
                },
            }
            self.pump();
            self.publish();
        }

        self.abandon_turn();
        self.machine.reset();
        self.enabled = false;
        self.publish();
        tracing::info!("Voice orchestrator stopped");
    }

    // =========================================================================
    // Messages
    // =========================================================================

    fn handle_message(&mut self, message: VoiceMessage) {
        match message {
            VoiceMessage::Enable => self.enable(),
            VoiceMessage::Disable => self.switch_off("Voice control turned off"),
            VoiceMessage::Cancel => {
                if self.machine.state().is_cancellable() {
                    self.abandon_turn();
                    self.transition(VoiceEvent::Cancel);
                    self.listen_for_wake_word();
                }
            }
            VoiceMessage::Timer { token } => match self.timers.remove(&token) {
                Some(kind) => self.on_timer(kind),
                None => tracing::debug!("Ignoring stale timer {}", token),
            },
            VoiceMessage::Shutdown => {}
        }
    }

    fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.listener.enable();
        if self.machine.state() == VoiceState::Error {
            self.transition(VoiceEvent::Recovered);
        }
        if self.transition(VoiceEvent::Enable) {
            self.listen_for_wake_word();
        }
    }

    /// Turns voice control off and tells the presentation layer why
    fn switch_off(&mut self, reason: &str) {
        self.abandon_turn();
        self.transition(VoiceEvent::Disable);
        if self.enabled {
            self.enabled = false;
            self.notify(VoiceNotice::VoiceDisabled {
                reason: reason.to_string(),
            });
        }
    }

    /// Unrecoverable device fault; voice control ends up off
    fn fault(&mut self, message: String) {
        tracing::error!("Voice fault: {}", message);
        self.abandon_turn();
        self.transition(VoiceEvent::Fault {
            message: message.clone(),
        });
        self.transition(VoiceEvent::Recovered);
        self.enabled = false;
        self.notify(VoiceNotice::VoiceDisabled { reason: message });
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::CommandTimeout => {
                if self.machine.state() == VoiceState::CommandListening {
                    tracing::debug!("No command heard in time");
                    self.cancel_capture();
                    self.end_command_turn();
                }
            }
            TimerKind::StepTimeout => {
                if self.machine.state() == VoiceState::FlowListening {
                    self.cancel_capture();
                    self.early_answer = None;
                    self.time_out_step();
                }
            }
            TimerKind::SpeechWatchdog => {
                if self.speaking.is_some() {
                    tracing::warn!("No speech completion received; carrying on");
                    self.finish_speaking();
                }
            }
            TimerKind::StopWatchdog(session) => {
                if self.arbiter.is_stopping(session) {
                    tracing::warn!("Capture {} never acknowledged its stop; releasing it", session);
                    self.on_capture_stopped(session);
                }
            }
            TimerKind::Grace => self.after_grace(),
            TimerKind::ListenerRestart => self.listen_for_wake_word(),
        }
    }

    // =========================================================================
    // Speech events
    // =========================================================================

    fn handle_speech(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::SpeechFinished { utterance } => {
                if self.speaking == Some(utterance) {
                    self.finish_speaking();
                } else {
                    tracing::debug!("Ignoring completion of utterance {}", utterance);
                }
            }
            SpeechEvent::Capture { session, event } => self.handle_capture(session, event),
        }
    }

    fn handle_capture(&mut self, session: CaptureSessionId, event: CaptureEvent) {
        if let CaptureEvent::Stopped = event {
            self.on_capture_stopped(session);
            return;
        }

        let Some((active, owner)) = self.arbiter.active() else {
            self.on_late_event(session, event);
            return;
        };
        if active != session {
            tracing::debug!("Ignoring event from stale capture {}", session);
            return;
        }

        match event {
            CaptureEvent::Interim(text) => self.on_interim(session, owner, &text),
            CaptureEvent::Final(text) => self.on_final(owner, &text),
            CaptureEvent::Error(error) => {
                self.arbiter.acknowledge(session);
                self.on_capture_error(owner, error);
            }
            CaptureEvent::Stopped => {}
        }
    }

    /// Event from a capture that is already stopping
    fn on_late_event(&mut self, session: CaptureSessionId, event: CaptureEvent) {
        match (&mut self.early_answer, event) {
            (Some((early, answer)), CaptureEvent::Final(text)) if *early == session => {
                tracing::debug!("Final transcript {:?} replaces early answer", text);
                *answer = text;
            }
            (_, event) => tracing::debug!("Ignoring {:?} from stopping capture {}", event, session),
        }
    }

    fn on_capture_stopped(&mut self, session: CaptureSessionId) {
        let requested = self.arbiter.is_stopping(session);
        let owner = self.arbiter.active().map(|(_, owner)| owner);
        if !self.arbiter.acknowledge(session) {
            tracing::debug!("Ignoring stop of stale capture {}", session);
            return;
        }
        self.cancel_timer(TimerKind::StopWatchdog(session));
        tracing::debug!("Capture {} stopped", session);

        if let Some((early, text)) = self.early_answer.take() {
            if early == session {
                self.submit_answer(&text);
                return;
            }
        }

        // The engine ended the session on its own
        if !requested {
            match owner {
                Some(CaptureOwner::WakeWord) => self.listen_for_wake_word(),
                Some(CaptureOwner::Command) => self.end_command_turn(),
                Some(CaptureOwner::Flow) => self.time_out_step(),
                None => {}
            }
        }
    }

    fn on_interim(&mut self, session: CaptureSessionId, owner: CaptureOwner, text: &str) {
        tracing::debug!("Interim ({:?}): {:?}", owner, text);
        match owner {
            CaptureOwner::WakeWord => {
                if self.listener.on_interim(text) {
                    self.notify(VoiceNotice::WakeHeard);
                }
            }
            CaptureOwner::Flow => {
                let stop_early = self
                    .flow
                    .as_mut()
                    .is_some_and(|flow| flow.on_interim(text));
                if stop_early {
                    tracing::debug!("Answer {:?} is stable; stopping capture early", text);
                    self.cancel_timer(TimerKind::StepTimeout);
                    self.early_answer = Some((session, text.to_string()));
                    self.stop_capture();
                }
            }
            CaptureOwner::Command => {}
        }
    }

    fn on_final(&mut self, owner: CaptureOwner, text: &str) {
        tracing::debug!("Final ({:?}): {:?}", owner, text);
        match owner {
            CaptureOwner::WakeWord => {
                let Some(outcome) = self.listener.on_final(text) else {
                    return;
                };
                self.stop_capture();
                self.transition(VoiceEvent::WakeWordDetected);
                match outcome {
                    WakeOutcome::ImmediateCommand(command) => {
                        self.transition(VoiceEvent::ImmediateCommand);
                        self.dispatch(&command);
                    }
                    WakeOutcome::WakeConfirmed => {
                        self.transition(VoiceEvent::AwaitCommand);
                        self.effects.push_back(Effect::Listen(CaptureOwner::Command));
                    }
                }
            }
            CaptureOwner::Command => {
                self.cancel_timer(TimerKind::CommandTimeout);
                self.stop_capture();
                if self.transition(VoiceEvent::TranscriptReceived) {
                    self.dispatch(text);
                }
            }
            CaptureOwner::Flow => {
                self.cancel_timer(TimerKind::StepTimeout);
                self.stop_capture();
                self.submit_answer(text);
            }
        }
    }

    fn on_capture_error(&mut self, owner: CaptureOwner, error: CaptureError) {
        if error.kind.is_fatal() {
            tracing::error!("{}", error);
            self.listener.on_error(error.kind);
            self.switch_off(&error.to_string());
            return;
        }

        tracing::warn!("{} ({:?} capture)", error, owner);
        match owner {
            CaptureOwner::WakeWord => {
                if let ListenerAction::Restart { delay } = self.listener.on_error(error.kind) {
                    tracing::debug!("Restarting wake-word capture in {:?}", delay);
                    self.start_timer(TimerKind::ListenerRestart, delay);
                }
            }
            CaptureOwner::Command => {
                self.cancel_timer(TimerKind::CommandTimeout);
                self.end_command_turn();
            }
            CaptureOwner::Flow => {
                self.cancel_timer(TimerKind::StepTimeout);
                self.time_out_step();
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn dispatch(&mut self, text: &str) {
        let command = self.interpreter.interpret(text);
        tracing::info!("Voice command: {} ({:?})", command.name(), text);

        match command {
            VoiceCommand::Cancel => {
                self.say("Okay, cancelled.");
                self.transition(VoiceEvent::Cancel);
                self.listen_for_wake_word();
            }
            VoiceCommand::StartCooling { item: None, .. } => {
                self.say("What are you cooling? Say start cooling and the item.");
                self.finish_command();
            }
            VoiceCommand::StartCooling {
                item: Some(item),
                category,
            } => {
                match self.manager.start(&item, category, &self.settings.site_id) {
                    Ok(session) => self.say(&format!("Started cooling {}.", session.item_name)),
                    Err(e) => {
                        tracing::warn!("Could not start {} by voice: {}", item, e);
                        self.say(FAILURE_SPEECH);
                    }
                }
                self.finish_command();
            }
            VoiceCommand::StopCooling { item_ref } => self.start_close_flow(item_ref.as_deref()),
            VoiceCommand::Discard { item_ref } => {
                self.discard(item_ref.as_deref());
                self.finish_command();
            }
            VoiceCommand::LogFridgeTemp { fridge } => {
                self.notify(VoiceNotice::FridgeLogRequested { fridge });
                self.say("Log the fridge temperature on screen.");
                self.finish_command();
            }
            VoiceCommand::Unknown { .. } => {
                self.say("Sorry, I didn't understand that.");
                self.finish_command();
            }
        }
    }

    fn start_close_flow(&mut self, item_ref: Option<&str>) {
        let sessions = match self.manager.active_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("Could not list open sessions: {}", e);
                self.say(FAILURE_SPEECH);
                self.finish_command();
                return;
            }
        };

        let Some(target) = resolve_target(item_ref, &sessions) else {
            self.say("There are no active cooling sessions to close.");
            self.finish_command();
            return;
        };

        self.flow = Some(CloseFlow::start(
            target,
            self.staff.clone(),
            self.settings.flow.clone(),
        ));
        self.transition(VoiceEvent::FlowTriggered);
        self.prompt_flow();
    }

    fn discard(&mut self, item_ref: Option<&str>) {
        let sessions = match self.manager.active_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("Could not list open sessions: {}", e);
                self.say(FAILURE_SPEECH);
                return;
            }
        };

        let Some(target) = resolve_target(item_ref, &sessions) else {
            self.say("There are no active cooling sessions to discard.");
            return;
        };

        match self.manager.discard(&target.id, VOICE_DISCARD_REASON) {
            Ok(session) => self.say(&format!("Discarded {}.", session.item_name)),
            Err(e) => {
                tracing::warn!("Could not discard {} by voice: {}", target.id, e);
                self.say(FAILURE_SPEECH);
            }
        }
    }

    fn finish_command(&mut self) {
        if self.transition(VoiceEvent::CommandDispatched) {
            self.listen_for_wake_word();
        }
    }

    fn end_command_turn(&mut self) {
        if self.transition(VoiceEvent::CommandTimeout) {
            self.listen_for_wake_word();
        }
    }

    // =========================================================================
    // Close flow
    // =========================================================================

    fn prompt_flow(&mut self) {
        let Some(prompt) = self.flow.as_ref().map(CloseFlow::prompt) else {
            return;
        };
        self.transition(VoiceEvent::PromptStarted);
        self.effects.push_back(Effect::Speak(prompt));
    }

    fn submit_answer(&mut self, text: &str) {
        if !self.transition(VoiceEvent::AnswerReceived) {
            return;
        }
        let Some(outcome) = self.flow.as_mut().map(|flow| flow.submit(text)) else {
            return;
        };
        self.apply_outcome(outcome);
    }

    fn time_out_step(&mut self) {
        let Some(outcome) = self.flow.as_mut().map(CloseFlow::timeout) else {
            return;
        };
        self.apply_outcome(outcome);
    }

    fn apply_outcome(&mut self, outcome: FlowOutcome) {
        match outcome {
            FlowOutcome::Advance => {
                self.transition(VoiceEvent::AnswerAccepted);
                self.prompt_flow();
            }
            FlowOutcome::Reprompt => {
                let event = if self.machine.state() == VoiceState::FlowListening {
                    VoiceEvent::StepTimeout
                } else {
                    VoiceEvent::AnswerRejected
                };
                self.transition(event);
                if let Some(prompt) = self.flow.as_ref().map(CloseFlow::prompt) {
                    self.effects.push_back(Effect::Speak(prompt));
                }
            }
            FlowOutcome::Commit(request) => {
                self.flow = None;
                match self.manager.close(&request.session_id, request.details) {
                    Ok(session) => {
                        self.transition(VoiceEvent::Committed);
                        self.say(&format!("{} is closed.", session.item_name));
                        self.transition(VoiceEvent::Resume);
                    }
                    Err(e) => {
                        tracing::warn!("Voice close of {} failed: {}", request.session_id, e);
                        self.say(FAILURE_SPEECH);
                        self.transition(VoiceEvent::Cancel);
                    }
                }
                self.listen_for_wake_word();
            }
            FlowOutcome::Cancelled => {
                self.flow = None;
                self.say("Cancelled. Nothing was saved.");
                self.transition(VoiceEvent::Cancel);
                self.listen_for_wake_word();
            }
            FlowOutcome::RetriesExhausted(context) => {
                self.flow = None;
                self.transition(VoiceEvent::RetriesExhausted);
                self.say(&format!("Please finish closing {} on screen.", context.item_name));
                self.notify(VoiceNotice::ManualFallback { context });
                self.transition(VoiceEvent::Resume);
                self.listen_for_wake_word();
            }
        }
    }

    // =========================================================================
    // Devices
    // =========================================================================

    fn device_free(&self) -> bool {
        self.arbiter.is_free() && self.speaking.is_none() && !self.grace_pending
    }

    /// Performs queued effects while the devices are free
    fn pump(&mut self) {
        while self.device_free() {
            let Some(effect) = self.effects.pop_front() else {
                break;
            };
            match effect {
                Effect::Speak(text) => self.speak_now(text),
                Effect::Listen(owner) => self.listen_now(owner),
            }
        }
    }

    fn say(&mut self, text: &str) {
        self.effects.push_back(Effect::Speak(text.to_string()));
    }

    fn speak_now(&mut self, text: String) {
        let utterance = self.next_utterance;
        self.next_utterance += 1;

        if let Err(e) = self.synthesizer.speak(utterance, &text) {
            self.fault(e.to_string());
            return;
        }
        tracing::debug!("Speaking {}: {:?}", utterance, text);
        self.speaking = Some(utterance);
        self.start_timer(TimerKind::SpeechWatchdog, self.settings.speech_watchdog);
        self.notify(VoiceNotice::Spoke { text });
    }

    fn finish_speaking(&mut self) {
        self.speaking = None;
        self.cancel_timer(TimerKind::SpeechWatchdog);
        if self.settings.speech_grace.is_zero() {
            self.after_grace();
        } else {
            self.grace_pending = true;
            self.start_timer(TimerKind::Grace, self.settings.speech_grace);
        }
    }

    fn after_grace(&mut self) {
        self.grace_pending = false;
        if self.machine.state() == VoiceState::FlowSpeaking
            && self.flow.is_some()
            && self.effects.is_empty()
            && self.transition(VoiceEvent::PromptFinished)
        {
            self.effects.push_back(Effect::Listen(CaptureOwner::Flow));
        }
    }

    fn listen_now(&mut self, owner: CaptureOwner) {
        let expected = match owner {
            CaptureOwner::WakeWord => VoiceState::WakeWordListening,
            CaptureOwner::Command => VoiceState::CommandListening,
            CaptureOwner::Flow => VoiceState::FlowListening,
        };
        if self.machine.state() != expected || !self.enabled {
            tracing::debug!("Dropping {:?} capture in {:?}", owner, self.machine.state());
            return;
        }

        let session = match self.arbiter.acquire(owner) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("{}", e);
                return;
            }
        };
        if owner == CaptureOwner::WakeWord {
            self.listener.begin_capture();
        }

        match self.capture.start(session) {
            Ok(()) => {
                tracing::debug!("Capture {} started for {:?}", session, owner);
                match owner {
                    CaptureOwner::Command => {
                        self.start_timer(TimerKind::CommandTimeout, self.settings.command_timeout)
                    }
                    CaptureOwner::Flow => {
                        if let Some(timeout) = self.flow.as_ref().map(CloseFlow::step_timeout) {
                            self.start_timer(TimerKind::StepTimeout, timeout);
                        }
                    }
                    CaptureOwner::WakeWord => {}
                }
            }
            Err(e) => {
                self.arbiter.acknowledge(session);
                self.on_capture_error(owner, e);
            }
        }
    }

    /// Queues wake-word capture if the machine is waiting for it
    fn listen_for_wake_word(&mut self) {
        if self.machine.state() != VoiceState::WakeWordListening || self.listener.is_disabled() {
            return;
        }
        let effect = Effect::Listen(CaptureOwner::WakeWord);
        let running = matches!(self.arbiter.active(), Some((_, CaptureOwner::WakeWord)));
        if !running && !self.effects.contains(&effect) {
            self.effects.push_back(effect);
        }
    }

    fn stop_capture(&mut self) {
        if let Some((session, _)) = self.arbiter.release() {
            self.start_timer(TimerKind::StopWatchdog(session), self.settings.stop_watchdog);
            self.capture.stop();
        }
    }

    fn cancel_capture(&mut self) {
        if let Some((session, _)) = self.arbiter.release() {
            self.start_timer(TimerKind::StopWatchdog(session), self.settings.stop_watchdog);
            self.capture.cancel();
        }
    }

    /// Drops everything belonging to the current turn
    fn abandon_turn(&mut self) {
        self.effects.clear();
        self.flow = None;
        self.early_answer = None;
        for kind in [
            TimerKind::CommandTimeout,
            TimerKind::StepTimeout,
            TimerKind::ListenerRestart,
            TimerKind::Grace,
            TimerKind::SpeechWatchdog,
        ] {
            self.cancel_timer(kind);
        }
        self.grace_pending = false;
        self.cancel_capture();
        if self.speaking.take().is_some() {
            self.synthesizer.cancel();
        }
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn transition(&mut self, event: VoiceEvent) -> bool {
        let state = self.machine.state();
        match self.machine.process_event(event.clone()) {
            Some(_) => true,
            None => {
                tracing::warn!("Ignoring {:?} in state {:?}", event, state);
                false
            }
        }
    }

    fn start_timer(&mut self, kind: TimerKind, after: Duration) {
        self.cancel_timer(kind);
        let token = self.next_timer;
        self.next_timer += 1;
        self.timers.insert(token, kind);

        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(VoiceMessage::Timer { token });
            }
        });
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        self.timers.retain(|_, pending| *pending != kind);
    }

    fn notify(&self, notice: VoiceNotice) {
        // Err only means nobody is subscribed
        let _ = self.notices.send(notice);
    }

    fn publish(&self) {
        let state = self.machine.state();
        let snapshot = VoiceSnapshot {
            state,
            description: state.description().to_string(),
            enabled: self.enabled,
            flow: self.flow.as_ref().map(CloseFlow::status),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
