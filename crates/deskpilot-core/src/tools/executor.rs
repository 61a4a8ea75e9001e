//! Tool context and result types shared by every tool implementation.

use std::sync::Arc;

use deskpilot_computer_control::HostAutomation;
use deskpilot_config::Config;
use deskpilot_providers::{ImageContent, Message};
use serde::Serialize;

use crate::action_sequencer::ActionSequencer;
use crate::coordinates::PointerSpace;
use crate::memory::MemoryStore;
use crate::state_extractor::StateExtractor;
use crate::ui_writer::UiWriter;

use super::integrations::{AuthRequired, IntegrationRouter};

/// Context passed to tool executors containing shared state.
pub struct ToolContext<'a, W: UiWriter> {
    pub config: &'a Config,
    pub ui_writer: &'a W,
    pub host: &'a Arc<dyn HostAutomation>,
    pub sequencer: &'a ActionSequencer,
    pub extractor: &'a StateExtractor,
    /// Updated whenever a screenshot is shown to the model
    pub pointer: &'a mut PointerSpace,
    pub memory: &'a MemoryStore,
    pub integrations: Option<&'a dyn IntegrationRouter>,
    /// Application the run is working in; `open_app` moves it
    pub target_app: &'a mut Option<String>,
    /// Images produced by the current tool, attached to its result
    pub pending_images: &'a mut Vec<ImageContent>,
}

/// Outcome of one tool call. Exactly one is produced per call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    #[serde(skip)]
    pub images: Vec<ImageContent>,
    pub auth_required: Option<AuthRequired>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn auth_required(auth: AuthRequired) -> Self {
        Self {
            success: false,
            error: Some(format!("Authentication with {} is required", auth.toolkit)),
            auth_required: Some(auth),
            ..Self::default()
        }
    }

    pub fn with_images(mut self, images: Vec<ImageContent>) -> Self {
        self.images = images;
        self
    }

    /// Text the model sees for this result.
    pub fn content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }

    pub fn into_message(self, tool_call_id: &str) -> Message {
        let content = self.content();
        Message::tool_result(tool_call_id, content, self.images)
    }
}
