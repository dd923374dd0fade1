//! Voice orchestration state machine
//!
//! Defines the states and transitions that arbitrate microphone and speech
//! between the wake-word listener, one-shot command capture and the close
//! flow. The machine is pure; the orchestrator feeds it events and performs
//! the side effects.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Voice control state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    /// Voice control disabled
    #[default]
    Idle,
    /// Listening for a wake phrase
    WakeWordListening,
    /// Wake phrase heard in a final transcript
    WakeWordDetected,
    /// Capturing a one-shot command
    CommandListening,
    /// Interpreting and dispatching a command
    ProcessingCommand,
    /// Close flow running, about to prompt
    FlowActive,
    /// Speaking a flow prompt
    FlowSpeaking,
    /// Capturing a flow answer
    FlowListening,
    /// Checking a flow answer
    FlowValidating,
    /// Flow committed
    FlowComplete,
    /// Flow gave up; manual entry expected
    FallbackManual,
    /// Unrecoverable fault
    Error,
}

impl VoiceState {
    /// Returns a human-readable description of the state
    pub fn description(&self) -> &'static str {
        match self {
            VoiceState::Idle => "Voice control off",
            VoiceState::WakeWordListening => "Listening for wake word",
            VoiceState::WakeWordDetected => "Wake word heard",
            VoiceState::CommandListening => "Listening for a command",
            VoiceState::ProcessingCommand => "Processing command",
            VoiceState::FlowActive => "Closing a cooling session",
            VoiceState::FlowSpeaking => "Asking a question",
            VoiceState::FlowListening => "Waiting for an answer",
            VoiceState::FlowValidating => "Checking the answer",
            VoiceState::FlowComplete => "Cooling session closed",
            VoiceState::FallbackManual => "Finish on screen",
            VoiceState::Error => "Voice control error",
        }
    }

    /// Returns whether a cancel command applies in this state
    pub fn is_cancellable(&self) -> bool {
        !matches!(self, VoiceState::Idle)
    }

    /// Returns whether the close flow owns the devices in this state
    pub fn is_in_flow(&self) -> bool {
        matches!(
            self,
            VoiceState::FlowActive
                | VoiceState::FlowSpeaking
                | VoiceState::FlowListening
                | VoiceState::FlowValidating
        )
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Voice control switched on
    Enable,
    /// Voice control switched off
    Disable,
    WakeWordDetected,
    /// Speech followed the wake phrase in the same utterance
    ImmediateCommand,
    /// Wake phrase alone; open a command turn
    AwaitCommand,
    /// Command transcript received
    TranscriptReceived,
    CommandTimeout,
    /// The command starts the close flow
    FlowTriggered,
    /// The command was handled without a flow
    CommandDispatched,
    PromptStarted,
    PromptFinished,
    AnswerReceived,
    /// No answer in time, retries remain
    StepTimeout,
    AnswerAccepted,
    AnswerRejected,
    RetriesExhausted,
    Committed,
    /// Leave a finished or abandoned flow
    Resume,
    Cancel,
    Fault { message: String },
    Recovered,
}

/// Reason for entering a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    UserActivation,
    UserDeactivation,
    WakeWord,
    CommandReady,
    CommandTurnOpened,
    Timeout,
    FlowStarted,
    Dispatched,
    Prompting,
    AwaitingAnswer,
    Validating,
    Accepted,
    Rejected,
    Exhausted,
    Committed,
    Resumed,
    UserCancellation,
    Error { message: String },
    Recovered,
}

/// Result of a state transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub previous_state: VoiceState,
    pub new_state: VoiceState,
    pub reason: TransitionReason,
}

/// Voice state machine
///
/// Owned by the orchestrator task; never shared.
pub struct VoiceStateMachine {
    state: VoiceState,
    state_entered_at: Instant,
}

impl VoiceStateMachine {
    /// Creates a new state machine in the Idle state
    pub fn new() -> Self {
        Self {
            state: VoiceState::Idle,
            state_entered_at: Instant::now(),
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Returns how long the machine has been in the current state
    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    /// Process an event and return the transition result if a transition occurred
    ///
    /// Returns `None` if the event is not valid for the current state.
    pub fn process_event(&mut self, event: VoiceEvent) -> Option<TransitionResult> {
        use VoiceEvent as E;
        use VoiceState as S;

        let next = match (self.state, event) {
            // Global transitions
            (_, E::Disable) => Some((S::Idle, TransitionReason::UserDeactivation)),
            (_, E::Fault { message }) => Some((S::Error, TransitionReason::Error { message })),
            (S::Error, E::Recovered) => Some((S::Idle, TransitionReason::Recovered)),
            (S::Error, _) => None,
            (S::Idle, E::Enable) => Some((S::WakeWordListening, TransitionReason::UserActivation)),
            (state, E::Cancel) if state.is_cancellable() => {
                Some((S::WakeWordListening, TransitionReason::UserCancellation))
            }

            // Wake word
            (S::WakeWordListening, E::WakeWordDetected) => {
                Some((S::WakeWordDetected, TransitionReason::WakeWord))
            }
            (S::WakeWordDetected, E::ImmediateCommand) => {
                Some((S::ProcessingCommand, TransitionReason::CommandReady))
            }
            (S::WakeWordDetected, E::AwaitCommand) => {
                Some((S::CommandListening, TransitionReason::CommandTurnOpened))
            }

            // Command turn
            (S::CommandListening, E::TranscriptReceived) => {
                Some((S::ProcessingCommand, TransitionReason::CommandReady))
            }
            (S::CommandListening, E::CommandTimeout) => {
                Some((S::WakeWordListening, TransitionReason::Timeout))
            }
            (S::ProcessingCommand, E::FlowTriggered) => {
                Some((S::FlowActive, TransitionReason::FlowStarted))
            }
            (S::ProcessingCommand, E::CommandDispatched) => {
                Some((S::WakeWordListening, TransitionReason::Dispatched))
            }

            // Close flow
            (S::FlowActive, E::PromptStarted) => Some((S::FlowSpeaking, TransitionReason::Prompting)),
            (S::FlowSpeaking, E::PromptFinished) => {
                Some((S::FlowListening, TransitionReason::AwaitingAnswer))
            }
            (S::FlowListening, E::AnswerReceived) => {
                Some((S::FlowValidating, TransitionReason::Validating))
            }
            (S::FlowListening, E::StepTimeout) => Some((S::FlowSpeaking, TransitionReason::Timeout)),
            (S::FlowValidating, E::AnswerAccepted) => {
                Some((S::FlowActive, TransitionReason::Accepted))
            }
            (S::FlowValidating, E::AnswerRejected) => {
                Some((S::FlowSpeaking, TransitionReason::Rejected))
            }
            (S::FlowValidating | S::FlowListening, E::RetriesExhausted) => {
                Some((S::FallbackManual, TransitionReason::Exhausted))
            }
            (S::FlowValidating, E::Committed) => {
                Some((S::FlowComplete, TransitionReason::Committed))
            }
            (S::FlowComplete | S::FallbackManual, E::Resume) => {
                Some((S::WakeWordListening, TransitionReason::Resumed))
            }

            // Invalid transitions
            _ => None,
        };

        let (new_state, reason) = next?;
        let result = TransitionResult {
            previous_state: self.state,
            new_state,
            reason,
        };
        self.apply_transition(&result);
        Some(result)
    }

    /// Apply a transition, updating internal state
    fn apply_transition(&mut self, result: &TransitionResult) {
        self.state = result.new_state;
        self.state_entered_at = Instant::now();

        tracing::info!(
            "Voice state transition: {:?} -> {:?} (reason: {:?})",
            result.previous_state,
            result.new_state,
            result.reason
        );
    }

    /// Reset the state machine to Idle
    pub fn reset(&mut self) {
        self.state = VoiceState::Idle;
        self.state_entered_at = Instant::now();
        tracing::info!("Voice state machine reset to Idle");
    }
}

impl Default for VoiceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
