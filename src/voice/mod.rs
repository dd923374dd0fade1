//! Voice control
//!
//! Wake-word detection, command interpretation and the close flow, driven by
//! a single orchestrator task that owns the microphone and the synthesizer.

pub mod capture;
pub mod flow;
pub mod interpreter;
pub mod listener;
pub mod numbers;
pub mod orchestrator;
pub mod state;

pub use capture::{CaptureArbiter, CaptureArbiterError, CaptureOwner};
pub use flow::{
    resolve_target, CloseFlow, CloseRequest, FlowContext, FlowOutcome, FlowPolicy, FlowStatus,
    FlowStep, TemperatureReading,
};
pub use interpreter::{match_preset, rules, CommandInterpreter, GrammarRule, VoiceCommand};
pub use listener::{ListenerAction, WakeOutcome, WakeWordListener};
pub use orchestrator::{
    spawn_voice, VoiceDevices, VoiceDirectories, VoiceHandle, VoiceNotice, VoiceSettings,
    VoiceSnapshot,
};
pub use state::{TransitionReason, TransitionResult, VoiceEvent, VoiceState, VoiceStateMachine};
