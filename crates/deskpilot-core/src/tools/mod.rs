//! Tool execution module for the deskpilot agent.
//!
//! Tools are organized by category:
//! - `computer` - pointer, keyboard, scripts and action sequences
//! - `state` - screenshots, state extraction and selections
//! - `memory` - remember / recall
//! - `misc` - wait and final_answer
//! - `integrations` - tools served by an external router
//! - `registry` - name lookup for all of the above

pub mod computer;
pub mod executor;
pub mod integrations;
pub mod memory;
pub mod misc;
pub mod registry;
pub mod state;

pub use executor::{ToolContext, ToolResult};
pub use integrations::{AuthRequired, IntegrationRouter};
pub use registry::{BuiltinTool, ToolKind, ToolRegistry};

use anyhow::{anyhow, Result};
use deskpilot_computer_control::Screenshot;
use deskpilot_providers::{ImageContent, ToolCall};

pub(crate) fn str_arg<'a>(tool_call: &'a ToolCall, key: &str) -> Result<&'a str> {
    tool_call
        .args
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing required '{}' parameter", key))
}

pub(crate) fn opt_str_arg<'a>(tool_call: &'a ToolCall, key: &str) -> Option<&'a str> {
    tool_call
        .args
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

pub(crate) fn f64_arg(tool_call: &ToolCall, key: &str) -> Result<f64> {
    tool_call
        .args
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| anyhow!("Missing required numeric '{}' parameter", key))
}

pub(crate) fn u64_arg(tool_call: &ToolCall, key: &str) -> Option<u64> {
    tool_call.args.get(key).and_then(|v| v.as_u64())
}

pub(crate) fn screenshot_image(screenshot: &Screenshot) -> ImageContent {
    ImageContent::new(&screenshot.media_type, screenshot.data.clone())
}
