//! Desktop action tools: pointer, keyboard, scripts and action sequences.
//!
//! Single actions go through the [`ActionSequencer`](crate::action_sequencer::ActionSequencer)
//! too, so coordinate mapping and host timeouts are applied in one place.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use deskpilot_computer_control::{process::with_timeout, ScriptLanguage, ScrollDirection};
use deskpilot_providers::ToolCall;
use tracing::debug;

use crate::action_sequencer::{ActionSpec, SequenceSummary};
use crate::ui_writer::UiWriter;

use super::executor::ToolContext;
use super::{f64_arg, opt_str_arg, screenshot_image, str_arg, u64_arg};

async fn run_sequence<W: UiWriter>(
    ctx: &mut ToolContext<'_, W>,
    actions: &[ActionSpec],
) -> Result<SequenceSummary> {
    let summary = ctx.sequencer.run(actions, ctx.pointer).await?;
    ctx.pending_images
        .extend(summary.screenshots.iter().map(screenshot_image));
    if let Some(last) = summary.screenshots.last() {
        ctx.pointer.observe(last);
    }
    Ok(summary)
}

fn point_args(tool_call: &ToolCall) -> Result<(f64, f64)> {
    Ok((f64_arg(tool_call, "x")?, f64_arg(tool_call, "y")?))
}

/// Execute `click`, `right_click`, `double_click` and `mouse_move`.
pub async fn execute_pointer<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let (x, y) = point_args(tool_call)?;
    let (action, verb) = match tool_call.tool.as_str() {
        "click" => (ActionSpec::Click { x, y }, "Clicked"),
        "right_click" => (ActionSpec::RightClick { x, y }, "Right-clicked"),
        "double_click" => (ActionSpec::DoubleClick { x, y }, "Double-clicked"),
        "mouse_move" => (ActionSpec::MouseMove { x, y }, "Moved pointer"),
        other => return Err(anyhow!("{} is not a pointer tool", other)),
    };

    let point = ctx.pointer.point(x, y);
    run_sequence(ctx, &[action]).await?;
    Ok(format!("{} at ({}, {})", verb, point.x, point.y))
}

pub async fn execute_drag<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let action = ActionSpec::Drag {
        from_x: f64_arg(tool_call, "from_x")?,
        from_y: f64_arg(tool_call, "from_y")?,
        to_x: f64_arg(tool_call, "to_x")?,
        to_y: f64_arg(tool_call, "to_y")?,
    };
    let description = action.describe();
    run_sequence(ctx, &[action]).await?;
    Ok(format!("Completed {}", description))
}

pub async fn execute_scroll<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let direction: ScrollDirection = str_arg(tool_call, "direction")?.parse()?;
    let amount = u64_arg(tool_call, "amount").unwrap_or(3).clamp(1, 50) as u32;

    run_sequence(ctx, &[ActionSpec::Scroll { direction, amount }]).await?;
    Ok(format!("Scrolled {:?} by {}", direction, amount).to_lowercase())
}

pub async fn execute_type_text<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let text = str_arg(tool_call, "text")?;
    if text.is_empty() {
        return Ok("Nothing to type".to_string());
    }

    run_sequence(ctx, &[ActionSpec::Type { text: text.to_string() }]).await?;
    Ok(format!("Typed {} characters", text.chars().count()))
}

pub async fn execute_press_key<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let keys = str_arg(tool_call, "keys")?.trim();
    let repeat = u64_arg(tool_call, "repeat").unwrap_or(1).clamp(1, 50) as u32;

    // Combinations may open or close windows; the sequencer waits on that
    let action = if keys.len() > 1 && keys.contains('+') {
        ActionSpec::Hotkey {
            keys: keys.to_string(),
        }
    } else {
        ActionSpec::Key {
            key: keys.to_string(),
            repeat,
        }
    };
    run_sequence(ctx, &[action]).await?;
    Ok(format!("Pressed {}", keys))
}

pub async fn execute_open_app<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let app = str_arg(tool_call, "app")?.trim().to_string();
    run_sequence(ctx, &[ActionSpec::Activate { app: app.clone() }]).await?;

    debug!("Target application is now {}", app);
    *ctx.target_app = Some(app.clone());
    Ok(format!("{} is now frontmost", app))
}

fn parse_language(value: Option<&str>) -> ScriptLanguage {
    match value.map(str::to_lowercase).as_deref() {
        Some("javascript") | Some("jxa") | Some("js") => ScriptLanguage::JavaScript,
        _ => ScriptLanguage::AppleScript,
    }
}

pub async fn execute_run_script<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let script = str_arg(tool_call, "script")?;
    let language = parse_language(opt_str_arg(tool_call, "language"));
    let limit = Duration::from_millis(ctx.config.computer_control.script_timeout_ms);

    let output = with_timeout("run_script", limit, ctx.host.run_host_script(language, script)).await?;
    let output = output.trim();
    if output.is_empty() {
        Ok("Script completed with no output".to_string())
    } else {
        Ok(output.to_string())
    }
}

pub async fn execute_run_actions<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let raw = tool_call
        .args
        .get("actions")
        .cloned()
        .ok_or_else(|| anyhow!("Missing required 'actions' parameter"))?;
    let actions: Vec<ActionSpec> =
        serde_json::from_value(raw).context("Invalid 'actions' parameter")?;
    if actions.is_empty() {
        return Ok("No actions to run".to_string());
    }

    let summary = run_sequence(ctx, &actions).await?;
    Ok(summary.describe())
}

pub async fn execute_insert_image<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let path = str_arg(tool_call, "path")?;
    run_sequence(ctx, &[ActionSpec::InsertImage { path: path.to_string() }]).await?;
    Ok(format!("Inserted image {}", path))
}

/// Paste over the current selection.
pub async fn execute_replace_text<W: UiWriter>(
    tool_call: &ToolCall,
    ctx: &mut ToolContext<'_, W>,
) -> Result<String> {
    let text = str_arg(tool_call, "text")?;
    let limit = Duration::from_millis(ctx.config.computer_control.action_timeout_ms);

    if let Some(app) = ctx.target_app.clone() {
        run_sequence(ctx, &[ActionSpec::Activate { app }]).await?;
    }
    with_timeout("replace_text", limit, ctx.host.paste_text(text)).await?;
    Ok(format!("Replaced selection with {} characters", text.chars().count()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_language() {
        assert_eq!(parse_language(None), ScriptLanguage::AppleScript);
        assert_eq!(parse_language(Some("JavaScript")), ScriptLanguage::JavaScript);
        assert_eq!(parse_language(Some("jxa")), ScriptLanguage::JavaScript);
        assert_eq!(parse_language(Some("applescript")), ScriptLanguage::AppleScript);
    }
}
