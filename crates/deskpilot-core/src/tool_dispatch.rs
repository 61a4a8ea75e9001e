//! Tool dispatch module - routes tool calls to their implementations.
//!
//! Every call produces exactly one [`ToolResult`]; tool errors become error
//! results for the model rather than failing the run.

use std::time::Duration;

use anyhow::Result;
use deskpilot_providers::ToolCall;
use tracing::{debug, warn};

use crate::tools::executor::{ToolContext, ToolResult};
use crate::tools::integrations::execute_integration;
use crate::tools::registry::{BuiltinTool, ToolKind};
use crate::tools::{computer, memory, misc, state};
use crate::ui_writer::UiWriter;

/// Dispatch a tool call to the appropriate handler.
pub async fn dispatch_tool<W: UiWriter>(
    tool_call: &ToolCall,
    kind: &ToolKind,
    ctx: &mut ToolContext<'_, W>,
) -> ToolResult {
    debug!("Dispatching tool: {}", tool_call.tool);

    let builtin = match kind {
        ToolKind::Builtin(builtin) => *builtin,
        ToolKind::External(name) => {
            return match ctx.integrations {
                Some(router) => {
                    let limit = Duration::from_millis(ctx.config.tools.integration_timeout_ms);
                    execute_integration(router, name, &tool_call.args, limit).await
                }
                None => {
                    warn!("No integration router for external tool {}", name);
                    ToolResult::error(format!("Integration tool {} is unavailable", name))
                }
            };
        }
    };

    ctx.pending_images.clear();
    let outcome = dispatch_builtin(builtin, tool_call, ctx).await;
    let images = std::mem::take(ctx.pending_images);

    match outcome {
        Ok(output) => ToolResult::ok(output).with_images(images),
        Err(e) => {
            warn!("Tool {} failed: {:#}", tool_call.tool, e);
            ToolResult::error(format!("{:#}", e))
        }
    }
}

async fn dispatch_builtin<W: UiWriter>(
    builtin: BuiltinTool,
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    match builtin {
        // Perception
        BuiltinTool::Screenshot => state::execute_screenshot(tool_call, ctx).await,
        BuiltinTool::ReadState => state::execute_read_state(tool_call, ctx).await,
        BuiltinTool::ReadSelection => state::execute_read_selection(tool_call, ctx).await,

        // Desktop actions
        BuiltinTool::Click
        | BuiltinTool::RightClick
        | BuiltinTool::DoubleClick
        | BuiltinTool::MouseMove => computer::execute_pointer(tool_call, ctx).await,
        BuiltinTool::Drag => computer::execute_drag(tool_call, ctx).await,
        BuiltinTool::Scroll => computer::execute_scroll(tool_call, ctx).await,
        BuiltinTool::TypeText => computer::execute_type_text(tool_call, ctx).await,
        BuiltinTool::PressKey => computer::execute_press_key(tool_call, ctx).await,
        BuiltinTool::OpenApp => computer::execute_open_app(tool_call, ctx).await,
        BuiltinTool::RunScript => computer::execute_run_script(tool_call, ctx).await,
        BuiltinTool::RunActions => computer::execute_run_actions(tool_call, ctx).await,
        BuiltinTool::InsertImage => computer::execute_insert_image(tool_call, ctx).await,
        BuiltinTool::ReplaceText => computer::execute_replace_text(tool_call, ctx).await,

        // Memory
        BuiltinTool::Remember => memory::execute_remember(tool_call, ctx).await,
        BuiltinTool::Recall => memory::execute_recall(tool_call, ctx).await,

        // Miscellaneous
        BuiltinTool::Wait => misc::execute_wait(tool_call, ctx).await,
        BuiltinTool::FinalAnswer => misc::execute_final_answer(tool_call, ctx).await,
    }
}
