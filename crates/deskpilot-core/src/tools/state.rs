//! Perception tools: screenshot, read_state, read_selection.

use std::time::Duration;

use anyhow::Result;
use deskpilot_computer_control::{process::with_timeout, ScreenshotOptions, VisionLimits};
use deskpilot_providers::ToolCall;
use tracing::debug;

use crate::ui_writer::UiWriter;

use super::executor::ToolContext;
use super::{opt_str_arg, screenshot_image};

/// Execute the `screenshot` tool.
pub async fn execute_screenshot<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let app = opt_str_arg(tool_call, "app").map(str::to_string);
    let options = ScreenshotOptions {
        app: app.clone(),
        region: None,
        limits: VisionLimits::with_max_edge(ctx.config.computer_control.max_screenshot_edge),
    };
    let limit = Duration::from_millis(ctx.config.computer_control.screenshot_timeout_ms);

    let screenshot = with_timeout("screenshot", limit, ctx.host.capture_screenshot(&options)).await?;
    debug!(
        "Screenshot {}x{} (captured at {}x{})",
        screenshot.width, screenshot.height, screenshot.original_width, screenshot.original_height
    );
    ctx.pending_images.push(screenshot_image(&screenshot));
    ctx.pointer.observe(&screenshot);

    let scope = match app {
        Some(app) => format!("{} window", app),
        None => "screen".to_string(),
    };
    Ok(format!(
        "Captured {} ({}x{}); image attached.",
        scope, screenshot.width, screenshot.height
    ))
}

/// Execute the `read_state` tool: a fresh tiered extraction.
pub async fn execute_read_state<W: UiWriter>(
    _tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let state = ctx.extractor.extract(ctx.target_app.as_deref(), None).await?;
    if let Some(ref screenshot) = state.screenshot {
        ctx.pending_images.push(screenshot_image(screenshot));
        ctx.pointer.observe(screenshot);
    }
    Ok(state.formatted)
}

pub async fn execute_read_selection<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let app = opt_str_arg(tool_call, "app")
        .map(str::to_string)
        .or_else(|| ctx.target_app.clone());
    let limit = Duration::from_millis(ctx.config.computer_control.action_timeout_ms);

    let selection = with_timeout(
        "read_selection",
        limit,
        ctx.host.read_selection(app.as_deref()),
    )
    .await?;
    match selection {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Ok("No text is selected.".to_string()),
    }
}
