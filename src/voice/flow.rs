//! Voice close flow
//!
//! Collects who is closing a cooling session and the temperature going into
//! the fridge, reads it back, and produces a [`CloseRequest`] once the user
//! confirms. The flow is pure: the orchestrator speaks its prompts, feeds it
//! transcripts and acts on the returned [`FlowOutcome`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use super::numbers::{ends_with_incomplete_number, parse_number, parse_whole_number};
use crate::config::{CoolingConfig, FlowConfig};
use crate::cooling::{CloseDetails, CoolingSession};
use crate::directory::{StaffDirectory, StaffMember};

static CANCEL_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ["cancel", "stop", "exit", "abort", "quit", "nevermind"]
        .into_iter()
        .collect()
});

static AFFIRMATIVE_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "yes",
        "yeah",
        "yep",
        "yup",
        "confirm",
        "confirmed",
        "correct",
        "right",
        "ok",
        "okay",
        "sure",
        "save",
        "affirmative",
    ]
    .into_iter()
    .collect()
});

/// Checked before the affirmatives, so "don't save" or "not right" never commit
static NEGATIVE_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "no", "nope", "nah", "wrong", "incorrect", "negative", "not", "don't", "dont", "isn't",
        "isnt", "doesn't", "doesnt", "never",
    ]
    .into_iter()
    .collect()
});

static SKIP_WORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ["skip", "pass", "none"].into_iter().collect());

/// Step of the close flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    AwaitingStaff,
    AwaitingTemperature,
    AwaitingConfirmation,
    Complete,
    Cancelled,
}

impl FlowStep {
    pub fn is_finished(&self) -> bool {
        matches!(self, FlowStep::Complete | FlowStep::Cancelled)
    }
}

/// Temperature answer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "celsius", rename_all = "snake_case")]
pub enum TemperatureReading {
    Reading(f64),
    Skipped,
}

impl TemperatureReading {
    pub fn celsius(&self) -> Option<f64> {
        match self {
            TemperatureReading::Reading(t) => Some(*t),
            TemperatureReading::Skipped => None,
        }
    }
}

/// Everything collected so far in one conversation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    pub session_id: String,
    pub item_name: String,
    pub staff_id: Option<String>,
    pub staff_name: Option<String>,
    pub temperature: Option<TemperatureReading>,
    pub confirmed: bool,
    pub retries: u32,
}

/// Close operation produced by a confirmed flow
#[derive(Debug, Clone, PartialEq)]
pub struct CloseRequest {
    pub session_id: String,
    pub details: CloseDetails,
}

/// Result of feeding the flow an answer or a timeout
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    /// Moved to the next step
    Advance,
    /// Same step again, with a clarification
    Reprompt,
    Commit(CloseRequest),
    Cancelled,
    /// Retry budget spent; carries what was collected
    RetriesExhausted(FlowContext),
}

/// Presentation view of a running flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStatus {
    pub step: FlowStep,
    pub item_name: String,
    pub staff_name: Option<String>,
    pub temperature: Option<TemperatureReading>,
    pub retries: u32,
}

/// Tunables shared by every flow
#[derive(Debug, Clone)]
pub struct FlowPolicy {
    pub max_retries: u32,
    pub interim_stable_hits: u32,
    pub step_timeout: Duration,
    pub confirm_timeout: Duration,
    pub compliant_below: f64,
    pub plausible_min: f64,
    pub plausible_max: f64,
}

impl FlowPolicy {
    pub fn from_config(flow: &FlowConfig, cooling: &CoolingConfig) -> Self {
        Self {
            max_retries: flow.max_retries,
            interim_stable_hits: flow.interim_stable_hits.max(1),
            step_timeout: Duration::from_secs(flow.step_timeout_secs),
            confirm_timeout: Duration::from_secs(flow.confirm_timeout_secs),
            compliant_below: cooling.compliant_below_celsius,
            plausible_min: cooling.plausible_min_celsius,
            plausible_max: cooling.plausible_max_celsius,
        }
    }
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self::from_config(&FlowConfig::default(), &CoolingConfig::default())
    }
}

/// Parsed answer to the current step
#[derive(Debug, Clone, PartialEq)]
enum Answer {
    Cancel,
    Staff(StaffMember),
    Temperature(TemperatureReading),
    Confirm(bool),
}

/// Why the current prompt is being repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    Invalid,
    Timeout,
}

/// Picks the session a close or discard command refers to
///
/// A number N selects the N-th open session (1-indexed). Otherwise the first
/// session whose name contains the reference wins. Anything else falls back
/// to the first open session.
pub fn resolve_target<'a>(
    reference: Option<&str>,
    sessions: &'a [CoolingSession],
) -> Option<&'a CoolingSession> {
    let first = sessions.first()?;
    let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
        return Some(first);
    };

    if let Some(n) = parse_whole_number(reference) {
        return Some(
            n.checked_sub(1)
                .and_then(|i| sessions.get(i as usize))
                .unwrap_or(first),
        );
    }

    let needle = reference.to_lowercase();
    Some(
        sessions
            .iter()
            .find(|s| s.item_name.to_lowercase().contains(&needle))
            .or_else(|| {
                sessions
                    .iter()
                    .find(|s| needle.contains(&s.item_name.to_lowercase()))
            })
            .unwrap_or(first),
    )
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_word(words: &[String], set: &HashSet<&'static str>) -> bool {
    words.iter().any(|w| set.contains(w.as_str()))
}

fn is_cancel(text: &str, words: &[String]) -> bool {
    has_word(words, &CANCEL_WORDS) || text.to_lowercase().contains("never mind")
}

fn format_celsius(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

pub struct CloseFlow {
    step: FlowStep,
    context: FlowContext,
    policy: FlowPolicy,
    staff: Arc<dyn StaffDirectory>,
    retry: Option<Retry>,
    interim_answer: Option<Answer>,
    interim_hits: u32,
}

impl CloseFlow {
    pub fn start(
        target: &CoolingSession,
        staff: Arc<dyn StaffDirectory>,
        policy: FlowPolicy,
    ) -> Self {
        tracing::info!("Starting close flow for {} ({})", target.item_name, target.id);
        Self {
            step: FlowStep::AwaitingStaff,
            context: FlowContext {
                session_id: target.id.clone(),
                item_name: target.item_name.clone(),
                staff_id: None,
                staff_name: None,
                temperature: None,
                confirmed: false,
                retries: 0,
            },
            policy,
            staff,
            retry: None,
            interim_answer: None,
            interim_hits: 0,
        }
    }

    pub fn step(&self) -> FlowStep {
        self.step
    }

    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    pub fn retries(&self) -> u32 {
        self.context.retries
    }

    pub fn status(&self) -> FlowStatus {
        FlowStatus {
            step: self.step,
            item_name: self.context.item_name.clone(),
            staff_name: self.context.staff_name.clone(),
            temperature: self.context.temperature,
            retries: self.context.retries,
        }
    }

    /// How long to wait for an answer to the current step
    pub fn step_timeout(&self) -> Duration {
        match self.step {
            FlowStep::AwaitingConfirmation => self.policy.confirm_timeout,
            _ => self.policy.step_timeout,
        }
    }

    /// Text to speak for the current step
    pub fn prompt(&self) -> String {
        let question = self.question();
        match self.retry {
            Some(Retry::Timeout) => format!("Sorry, I didn't hear that. {}", question),
            Some(Retry::Invalid) => format!("{} {}", self.clarification(), question),
            None => question,
        }
    }

    fn question(&self) -> String {
        let ctx = &self.context;
        match self.step {
            FlowStep::AwaitingStaff => {
                format!("Closing {}. What is your staff number?", ctx.item_name)
            }
            FlowStep::AwaitingTemperature => {
                let name = ctx.staff_name.as_deref().unwrap_or("there");
                format!(
                    "Thanks {}. What is the temperature of the {}? Say skip if you don't have one.",
                    name, ctx.item_name
                )
            }
            FlowStep::AwaitingConfirmation => self.summary(),
            FlowStep::Complete => format!("{} is closed.", ctx.item_name),
            FlowStep::Cancelled => "Cancelled. Nothing was saved.".to_string(),
        }
    }

    fn clarification(&self) -> &'static str {
        match self.step {
            FlowStep::AwaitingStaff => "I couldn't find that staff number.",
            FlowStep::AwaitingTemperature => "I didn't catch a temperature.",
            FlowStep::AwaitingConfirmation => "Please say confirm or cancel.",
            FlowStep::Complete | FlowStep::Cancelled => "",
        }
    }

    /// Read-back of the collected values
    fn summary(&self) -> String {
        let ctx = &self.context;
        let who = ctx.staff_name.as_deref().unwrap_or("unknown staff");
        let mut text = match ctx.temperature {
            Some(TemperatureReading::Reading(t)) => format!(
                "Close {}, by {}, at {} degrees?",
                ctx.item_name,
                who,
                format_celsius(t)
            ),
            _ => format!("Close {}, by {}, with no temperature?", ctx.item_name, who),
        };

        if let Some(TemperatureReading::Reading(t)) = ctx.temperature {
            if t < self.policy.plausible_min || t > self.policy.plausible_max {
                text.push_str(" That reading looks unusual.");
            } else if t >= self.policy.compliant_below {
                text.push_str(&format!(
                    " That is not below {} degrees.",
                    format_celsius(self.policy.compliant_below)
                ));
            }
        }
        text.push_str(" Say confirm or cancel.");
        text
    }

    fn parse_answer(&self, text: &str) -> Option<Answer> {
        let words = words(text);
        if is_cancel(text, &words) {
            return Some(Answer::Cancel);
        }

        match self.step {
            FlowStep::AwaitingStaff => {
                let code = parse_whole_number(text)?;
                self.staff.find_by_code(code).map(Answer::Staff)
            }
            FlowStep::AwaitingTemperature => {
                if has_word(&words, &SKIP_WORDS) {
                    return Some(Answer::Temperature(TemperatureReading::Skipped));
                }
                parse_number(text).map(|t| Answer::Temperature(TemperatureReading::Reading(t)))
            }
            FlowStep::AwaitingConfirmation => {
                if has_word(&words, &NEGATIVE_WORDS) {
                    Some(Answer::Confirm(false))
                } else if has_word(&words, &AFFIRMATIVE_WORDS) {
                    Some(Answer::Confirm(true))
                } else {
                    None
                }
            }
            FlowStep::Complete | FlowStep::Cancelled => None,
        }
    }

    /// Feeds a finished transcript to the current step
    pub fn submit(&mut self, text: &str) -> FlowOutcome {
        self.reset_interim();
        if self.step.is_finished() {
            tracing::warn!("Answer {:?} after the close flow finished", text);
            return FlowOutcome::Cancelled;
        }

        tracing::debug!("Close flow {:?} answer: {:?}", self.step, text);
        match self.parse_answer(text) {
            Some(Answer::Cancel) | Some(Answer::Confirm(false)) => self.cancel(),
            Some(Answer::Staff(member)) => {
                self.context.staff_id = Some(member.id);
                self.context.staff_name = Some(member.name);
                self.advance(FlowStep::AwaitingTemperature)
            }
            Some(Answer::Temperature(reading)) => {
                self.context.temperature = Some(reading);
                self.advance(FlowStep::AwaitingConfirmation)
            }
            Some(Answer::Confirm(true)) => {
                self.context.confirmed = true;
                self.step = FlowStep::Complete;
                self.retry = None;
                tracing::info!("Close flow confirmed for {}", self.context.session_id);
                FlowOutcome::Commit(self.close_request())
            }
            None => self.fail(Retry::Invalid),
        }
    }

    /// No answer arrived in time
    pub fn timeout(&mut self) -> FlowOutcome {
        self.reset_interim();
        if self.step.is_finished() {
            return FlowOutcome::Cancelled;
        }
        tracing::debug!("Close flow {:?} timed out", self.step);
        self.fail(Retry::Timeout)
    }

    /// Watches partial transcripts for an answer
    ///
    /// Returns true when capture can stop early: the same answer has been
    /// seen on enough consecutive interims and the speaker is not midway
    /// through a number.
    pub fn on_interim(&mut self, text: &str) -> bool {
        if self.step.is_finished() || ends_with_incomplete_number(text) {
            self.reset_interim();
            return false;
        }

        let Some(answer) = self.parse_answer(text) else {
            self.reset_interim();
            return false;
        };

        if self.interim_answer.as_ref() == Some(&answer) {
            self.interim_hits += 1;
        } else {
            self.interim_answer = Some(answer);
            self.interim_hits = 1;
        }
        self.interim_hits >= self.policy.interim_stable_hits
    }

    fn reset_interim(&mut self) {
        self.interim_answer = None;
        self.interim_hits = 0;
    }

    fn advance(&mut self, next: FlowStep) -> FlowOutcome {
        tracing::debug!("Close flow {:?} -> {:?}", self.step, next);
        self.step = next;
        self.context.retries = 0;
        self.retry = None;
        FlowOutcome::Advance
    }

    fn cancel(&mut self) -> FlowOutcome {
        tracing::info!("Close flow cancelled for {}", self.context.session_id);
        self.step = FlowStep::Cancelled;
        self.retry = None;
        FlowOutcome::Cancelled
    }

    fn fail(&mut self, retry: Retry) -> FlowOutcome {
        self.context.retries += 1;
        self.retry = Some(retry);
        if self.context.retries >= self.policy.max_retries {
            tracing::warn!(
                "Close flow gave up on {:?} after {} attempts",
                self.step,
                self.context.retries
            );
            return FlowOutcome::RetriesExhausted(self.context.clone());
        }
        FlowOutcome::Reprompt
    }

    fn close_request(&self) -> CloseRequest {
        CloseRequest {
            session_id: self.context.session_id.clone(),
            details: CloseDetails {
                temperature: self.context.temperature.and_then(|t| t.celsius()),
                staff_id: self.context.staff_id.clone(),
                staff_name: self.context.staff_name.clone(),
            },
        }
    }
}
