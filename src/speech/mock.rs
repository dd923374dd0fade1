//! Scripted speech adapters for tests
//!
//! Every call is recorded in a shared [`SpeechLog`]. Stops are acknowledged
//! and utterances finish immediately unless told otherwise; transcripts are
//! injected by the test through the same [`SpeechSink`] the orchestrator
//! reads.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{
    CaptureError, CaptureEvent, CaptureSessionId, SpeechCapture, SpeechSink, SpeechSynthesizer,
    SynthesisError, UtteranceId,
};

/// A recorded adapter call
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechCall {
    StartCapture(CaptureSessionId),
    StopCapture(CaptureSessionId),
    CancelCapture(CaptureSessionId),
    Speak(UtteranceId, String),
    CancelSpeech,
}

#[derive(Debug, Default)]
struct LogState {
    calls: Vec<SpeechCall>,
    active_capture: Option<CaptureSessionId>,
    auto_ack_stop: bool,
    auto_finish_speech: bool,
    fail_next_start: Option<CaptureError>,
}

/// Shared record of mock adapter calls
#[derive(Debug, Clone)]
pub struct SpeechLog {
    state: Arc<Mutex<LogState>>,
    sink: SpeechSink,
}

impl SpeechLog {
    pub fn calls(&self) -> Vec<SpeechCall> {
        self.state.lock().calls.clone()
    }

    /// Texts passed to the synthesizer, in order
    pub fn spoken(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SpeechCall::Speak(_, text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_spoken(&self) -> Option<String> {
        self.spoken().pop()
    }

    /// Capture session currently running, if any
    pub fn active_capture(&self) -> Option<CaptureSessionId> {
        self.state.lock().active_capture
    }

    /// Number of `start` calls so far
    pub fn capture_starts(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, SpeechCall::StartCapture(_)))
            .count()
    }

    pub fn set_auto_ack_stop(&self, enabled: bool) {
        self.state.lock().auto_ack_stop = enabled;
    }

    pub fn set_auto_finish_speech(&self, enabled: bool) {
        self.state.lock().auto_finish_speech = enabled;
    }

    pub fn fail_next_start(&self, error: CaptureError) {
        self.state.lock().fail_next_start = Some(error);
    }

    /// Delivers an interim transcript to the active capture session
    pub fn interim(&self, text: &str) -> bool {
        self.emit(CaptureEvent::Interim(text.to_string()))
    }

    /// Delivers a final transcript to the active capture session
    pub fn final_transcript(&self, text: &str) -> bool {
        self.emit(CaptureEvent::Final(text.to_string()))
    }

    /// Fails the active capture session, which ends it
    pub fn error(&self, error: CaptureError) -> bool {
        let sent = self.emit(CaptureEvent::Error(error));
        self.state.lock().active_capture = None;
        sent
    }

    /// Sends an event to the active session. Returns false if none is active.
    pub fn emit(&self, event: CaptureEvent) -> bool {
        let active = self.state.lock().active_capture;
        match active {
            Some(session) => {
                self.sink.capture(session, event);
                true
            }
            None => false,
        }
    }

    pub fn sink(&self) -> &SpeechSink {
        &self.sink
    }
}

/// Creates a mock capture adapter and synthesizer sharing one log
pub fn mock_speech(sink: SpeechSink) -> (MockCapture, MockSynthesizer, SpeechLog) {
    let log = SpeechLog {
        state: Arc::new(Mutex::new(LogState {
            auto_ack_stop: true,
            auto_finish_speech: true,
            ..LogState::default()
        })),
        sink,
    };
    (
        MockCapture { log: log.clone() },
        MockSynthesizer { log: log.clone() },
        log,
    )
}

pub struct MockCapture {
    log: SpeechLog,
}

impl MockCapture {
    fn end_session(&mut self, record: fn(CaptureSessionId) -> SpeechCall) {
        let (session, ack) = {
            let mut state = self.log.state.lock();
            let session = state.active_capture.take();
            if let Some(id) = session {
                state.calls.push(record(id));
            }
            (session, state.auto_ack_stop)
        };
        if let (Some(id), true) = (session, ack) {
            self.log.sink.capture(id, CaptureEvent::Stopped);
        }
    }
}

impl SpeechCapture for MockCapture {
    fn start(&mut self, session: CaptureSessionId) -> Result<(), CaptureError> {
        let mut state = self.log.state.lock();
        state.calls.push(SpeechCall::StartCapture(session));
        if let Some(error) = state.fail_next_start.take() {
            return Err(error);
        }
        state.active_capture = Some(session);
        Ok(())
    }

    fn stop(&mut self) {
        self.end_session(SpeechCall::StopCapture);
    }

    fn cancel(&mut self) {
        self.end_session(SpeechCall::CancelCapture);
    }
}

pub struct MockSynthesizer {
    log: SpeechLog,
}

impl SpeechSynthesizer for MockSynthesizer {
    fn speak(&mut self, utterance: UtteranceId, text: &str) -> Result<(), SynthesisError> {
        let finish = {
            let mut state = self.log.state.lock();
            state
                .calls
                .push(SpeechCall::Speak(utterance, text.to_string()));
            state.auto_finish_speech
        };
        if finish {
            self.log.sink.speech_finished(utterance);
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.log.state.lock().calls.push(SpeechCall::CancelSpeech);
    }
}
