//! Formatting of stored runs and memories for the terminal.

use crossterm::style::{Color, ResetColor, SetForegroundColor};
use deskpilot_core::{MemoryEntry, RunRecord};

const MAX_PREVIEW_CHARS: usize = 60;

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(MAX_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

/// One line per run: local time, app, query and answer preview.
pub fn format_run(record: &RunRecord) -> String {
    let when = record
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M");
    let app = record.target_app.as_deref().unwrap_or("-");
    let outcome = if record.cancelled {
        "(cancelled)".to_string()
    } else {
        preview(&record.response)
    };
    format!(
        "{}  [{}]  {} -> {}",
        when,
        app,
        preview(&record.query),
        outcome
    )
}

pub fn print_history(records: &[RunRecord]) {
    if records.is_empty() {
        println!("No runs recorded yet.");
        return;
    }
    for record in records {
        println!("{}", format_run(record));
        if !record.tools_used.is_empty() {
            println!(
                "    {}tools: {}{}",
                SetForegroundColor(Color::DarkGrey),
                record.tools_used.join(", "),
                ResetColor
            );
        }
    }
}

pub fn print_memories(entries: &[MemoryEntry]) {
    if entries.is_empty() {
        println!("Nothing remembered yet.");
        return;
    }
    for entry in entries {
        println!(
            "- {} {}({}){}",
            entry.fact,
            SetForegroundColor(Color::DarkGrey),
            entry.created_at.format("%Y-%m-%d"),
            ResetColor
        );
    }
}
