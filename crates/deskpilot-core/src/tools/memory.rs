//! Memory tools: remember, recall.
//!
//! Facts live in the [`MemoryStore`](crate::memory::MemoryStore) and outlast
//! the run; relevant ones are also added to the system prompt of later runs.

use anyhow::Result;
use deskpilot_providers::ToolCall;

use crate::memory::{format_memories, MemorySource};
use crate::ui_writer::UiWriter;

use super::executor::ToolContext;
use super::{str_arg, u64_arg};

const MAX_FACT_CHARS: usize = 500;

/// Execute the remember tool.
pub async fn execute_remember<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let fact = str_arg(tool_call, "fact")?.trim();
    if fact.chars().count() > MAX_FACT_CHARS {
        anyhow::bail!("Fact is too long ({} chars, max {})", fact.chars().count(), MAX_FACT_CHARS);
    }

    if ctx.memory.add(fact, MemorySource::Tool)? {
        Ok(format!("Remembered: {}", fact))
    } else {
        Ok("Already remembered.".to_string())
    }
}

/// Execute the recall tool.
pub async fn execute_recall<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let query = str_arg(tool_call, "query")?;
    let limit = u64_arg(tool_call, "limit")
        .map(|l| l as usize)
        .unwrap_or(ctx.config.agent.memory_search_limit)
        .max(1);

    let hits = ctx.memory.search(query, limit)?;
    if hits.is_empty() {
        Ok("No matching memories.".to_string())
    } else {
        Ok(format_memories(&hits))
    }
}
