//! Speech I/O boundary
//!
//! Recognition and synthesis are external collaborators. They are driven
//! through the narrow [`SpeechCapture`] and [`SpeechSynthesizer`] traits and
//! report back asynchronously through a [`SpeechSink`], so the voice
//! orchestrator never blocks on a device.

pub mod console;
pub mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Identifies one capture session; events from older sessions are stale
pub type CaptureSessionId = u64;

/// Identifies one spoken utterance
pub type UtteranceId = u64;

/// Kind of recognition failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureErrorKind {
    NoSpeech,
    PermissionDenied,
    DeviceUnavailable,
    Network,
    Aborted,
    Other,
}

impl CaptureErrorKind {
    /// Errors that disable voice control until it is re-enabled
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureErrorKind::PermissionDenied | CaptureErrorKind::DeviceUnavailable
        )
    }
}

impl fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureErrorKind::NoSpeech => "no speech",
            CaptureErrorKind::PermissionDenied => "permission denied",
            CaptureErrorKind::DeviceUnavailable => "no microphone",
            CaptureErrorKind::Network => "network",
            CaptureErrorKind::Aborted => "aborted",
            CaptureErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Recognition error reported by a capture adapter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Speech capture failed ({kind}): {message}")]
pub struct CaptureError {
    pub kind: CaptureErrorKind,
    pub message: String,
}

impl CaptureError {
    pub fn new(kind: CaptureErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Synthesis error reported by a synthesizer adapter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Speech synthesis failed: {0}")]
pub struct SynthesisError(pub String);

/// Event produced by a capture session
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Partial transcript; may still change
    Interim(String),
    /// Finished transcript for the utterance
    Final(String),
    Error(CaptureError),
    /// Acknowledges `stop` or `cancel`; the microphone is free again
    Stopped,
}

/// Message from a speech adapter to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Capture {
        session: CaptureSessionId,
        event: CaptureEvent,
    },
    SpeechFinished {
        utterance: UtteranceId,
    },
}

/// Sending half handed to speech adapters
#[derive(Debug, Clone)]
pub struct SpeechSink {
    tx: mpsc::UnboundedSender<SpeechEvent>,
}

impl SpeechSink {
    pub fn capture(&self, session: CaptureSessionId, event: CaptureEvent) {
        self.send(SpeechEvent::Capture { session, event });
    }

    pub fn speech_finished(&self, utterance: UtteranceId) {
        self.send(SpeechEvent::SpeechFinished { utterance });
    }

    fn send(&self, event: SpeechEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Voice orchestrator gone; dropping speech event");
        }
    }
}

/// Creates the channel between speech adapters and the orchestrator
pub fn speech_channel() -> (SpeechSink, mpsc::UnboundedReceiver<SpeechEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SpeechSink { tx }, rx)
}

/// Speech-to-text device
///
/// Only one capture session may run at a time. After `stop` or `cancel` the
/// adapter must report [`CaptureEvent::Stopped`] for that session. A session
/// that reports [`CaptureEvent::Error`] is over and needs no stop.
pub trait SpeechCapture: Send {
    fn start(&mut self, session: CaptureSessionId) -> Result<(), CaptureError>;

    /// Finish the utterance; a final transcript may still arrive
    fn stop(&mut self);

    /// Abandon the utterance
    fn cancel(&mut self);
}

/// Text-to-speech device
///
/// Completion is reported with [`SpeechSink::speech_finished`].
pub trait SpeechSynthesizer: Send {
    fn speak(&mut self, utterance: UtteranceId, text: &str) -> Result<(), SynthesisError>;

    fn cancel(&mut self);
}
