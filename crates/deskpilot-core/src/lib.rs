//! Agent orchestration engine for the deskpilot desktop copilot.
//!
//! A run reads the state of the user's application, asks the model what to
//! do, executes the tool calls it returns (with user approval where needed),
//! and repeats until the model gives a final answer.

pub mod action_sequencer;
pub mod agent;
pub mod approval;
pub mod context_window;
pub mod coordinates;
pub mod error;
pub mod error_handling;
pub mod history;
pub mod memory;
pub mod prompts;
pub mod provider_registration;
pub mod settings;
pub mod state_extractor;
pub mod tool_definitions;
pub mod tool_dispatch;
pub mod tools;
pub mod ui_writer;

pub use action_sequencer::{
    ActionSequenceError, ActionSequencer, ActionSpec, Clock, ManualClock, SequenceSummary,
    TokioClock, WaitCondition, WaitOutcome, WaitPolicy,
};
pub use agent::{Agent, AgentBuilder, LoopState, Run};
pub use approval::{
    ApprovalCategory, ApprovalDecision, ApprovalGate, ApprovalPolicy, ApprovalRequest, AuthGate,
    GateError,
};
pub use context_window::{ContextWindow, MemoryFlushPolicy};
pub use coordinates::{CoordinateMapper, PointerSpace, ScreenshotFrame};
pub use error::AgentError;
pub use history::{ActionLogEntry, HistoryStore, InMemoryHistoryStore, JsonlHistoryStore, RunRecord};
pub use memory::{MemoryEntry, MemoryFlusher, MemorySource, MemoryStore};
pub use provider_registration::register_providers;
pub use settings::{FileSettingsStore, RunSettings, SettingsStore, StaticSettingsStore, ToolSetting};
pub use state_extractor::{AppState, ExtractionError, StateExtractor};
pub use tools::executor::ToolResult;
pub use tools::integrations::{AuthRequired, IntegrationRouter};
pub use tools::registry::{BuiltinTool, ToolKind, ToolRegistry};
pub use ui_writer::{NullUiWriter, UiWriter};
