//! Wake-word listener
//!
//! Decides what a wake-word capture session's transcripts mean. Device
//! control stays with the orchestrator; this type only matches phrases and
//! computes restart delays.

use std::time::Duration;

use crate::config::ListenerConfig;
use crate::speech::CaptureErrorKind;

/// Characters dropped between the wake phrase and a trailing command
const COMMAND_SEPARATORS: [char; 6] = [',', ':', '.', '!', '?', ' '];

/// What a final transcript containing a wake phrase asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Speech followed the phrase in the same utterance
    ImmediateCommand(String),
    /// The phrase alone; open a command turn
    WakeConfirmed,
}

/// What to do after a capture error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    Restart { delay: Duration },
    /// Stay off until voice control is enabled again
    Disable,
}

pub struct WakeWordListener {
    phrases: Vec<String>,
    backoff_base: Duration,
    backoff_cap: Duration,
    consecutive_errors: u32,
    heard_this_capture: bool,
    disabled: bool,
}

impl WakeWordListener {
    pub fn new(phrases: &[String], config: &ListenerConfig) -> Self {
        let phrases = phrases
            .iter()
            .map(|p| normalise(p))
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            phrases,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            consecutive_errors: 0,
            heard_this_capture: false,
            disabled: false,
        }
    }

    /// Called whenever a new wake-word capture session starts
    pub fn begin_capture(&mut self) {
        self.heard_this_capture = false;
    }

    /// Returns true the first time a wake phrase shows up in this capture
    pub fn on_interim(&mut self, text: &str) -> bool {
        if self.heard_this_capture {
            return false;
        }
        if self.find_phrase(&normalise(text)).is_some() {
            self.heard_this_capture = true;
            return true;
        }
        false
    }

    /// Interprets a final transcript. `None` if no wake phrase was said.
    pub fn on_final(&mut self, text: &str) -> Option<WakeOutcome> {
        self.consecutive_errors = 0;

        let normalised = normalise(text);
        let end = self.find_phrase(&normalised)?;
        let rest = normalised[end..]
            .trim_start_matches(COMMAND_SEPARATORS)
            .trim();

        if rest.is_empty() {
            Some(WakeOutcome::WakeConfirmed)
        } else {
            Some(WakeOutcome::ImmediateCommand(rest.to_string()))
        }
    }

    /// Restart policy for a capture error
    ///
    /// No-speech restarts at the base delay without escalating; other
    /// recoverable errors back off exponentially up to the cap.
    pub fn on_error(&mut self, kind: CaptureErrorKind) -> ListenerAction {
        if kind.is_fatal() {
            self.disabled = true;
            return ListenerAction::Disable;
        }
        if kind == CaptureErrorKind::NoSpeech {
            return ListenerAction::Restart {
                delay: self.backoff_base,
            };
        }

        let exponent = self.consecutive_errors.min(16);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        let delay = self
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_cap);
        ListenerAction::Restart { delay }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Clears a previous fatal error and the backoff
    pub fn enable(&mut self) {
        self.disabled = false;
        self.consecutive_errors = 0;
    }

    /// Byte offset just past the earliest wake phrase in `normalised`
    fn find_phrase(&self, normalised: &str) -> Option<usize> {
        self.phrases
            .iter()
            .filter_map(|phrase| {
                normalised
                    .find(phrase.as_str())
                    .map(|start| (start, start + phrase.len()))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(_, end)| end)
    }
}

/// Lowercase with punctuation folded to single spaces
fn normalise(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' || c == '.' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    folded
        .split_whitespace()
        .map(|w| w.trim_end_matches('.'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
