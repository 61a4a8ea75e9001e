//! Miscellaneous tools: wait, final_answer.

use anyhow::Result;
use deskpilot_providers::ToolCall;
use tracing::debug;

use crate::action_sequencer::ActionSpec;
use crate::ui_writer::UiWriter;

use super::executor::ToolContext;
use super::{opt_str_arg, u64_arg};

const MAX_WAIT_MS: u64 = 10_000;

/// Execute the `wait` tool. Long waits are capped.
pub async fn execute_wait<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let ms = u64_arg(tool_call, "ms").unwrap_or(1000).min(MAX_WAIT_MS);
    ctx.sequencer
        .run(&[ActionSpec::Wait { ms }], ctx.pointer)
        .await?;
    Ok(format!("Waited {}ms", ms))
}

/// Execute the `final_answer` tool. The loop ends the run with its output.
pub async fn execute_final_answer<W: UiWriter>(
    tool_call: &ToolCall,
    _ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    debug!("Processing final_answer tool call");

    match opt_str_arg(tool_call, "answer") {
        Some(answer) => Ok(answer.to_string()),
        None => Ok("Done.".to_string()),
    }
}
