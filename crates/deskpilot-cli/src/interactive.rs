//! Interactive mode for the deskpilot CLI.

use std::sync::Arc;

use anyhow::Result;
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use deskpilot_core::{Agent, HistoryStore, JsonlHistoryStore, MemoryStore, UiWriter};
use tracing::{debug, error};

use crate::display::{print_history, print_memories};
use crate::line_input::{history_path, LineReader, ReadOutcome};
use crate::run_query;

const HELP: &str = "Type a request and press Enter. Commands:
  /app <name>   work in <name> instead of the frontmost application
  /app          go back to the frontmost application
  /history [n]  show the last n runs (default 10)
  /memory       list what deskpilot remembers about you
  /help         show this help
  /exit         quit";

/// What a line of input asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Run(&'a str),
    App(Option<&'a str>),
    History(usize),
    Memory,
    Help,
    Exit,
    Unknown(&'a str),
    Empty,
}

pub fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Run(line);
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (rest, None),
    };
    match name {
        "app" => Command::App(arg),
        "history" => Command::History(arg.and_then(|a| a.parse().ok()).unwrap_or(10)),
        "memory" => Command::Memory,
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => Command::Unknown(other),
    }
}

/// Read requests until the user exits. Each request is one agent run.
pub async fn run_interactive<W: UiWriter + 'static>(
    agent: Arc<Agent<W>>,
    input: Arc<LineReader>,
    initial_app: Option<String>,
) -> Result<()> {
    println!();
    println!("deskpilot");
    println!("      >> what can I do for you? (/help for commands)");
    println!();

    let mut target_app = initial_app;
    loop {
        let prompt = match target_app {
            Some(ref app) => format!("deskpilot | {}> ", app),
            None => "deskpilot> ".to_string(),
        };

        let line = match input.read_line(&prompt).await {
            Ok(ReadOutcome::Line(line)) => line,
            Ok(ReadOutcome::Interrupted) => continue,
            Ok(ReadOutcome::Eof) => break,
            Err(e) => {
                error!("{:#}", e);
                break;
            }
        };
        if !line.trim().is_empty() {
            input.remember(&line);
        }

        match parse_command(&line) {
            Command::Empty => {}
            Command::Run(query) => {
                if let Err(e) = run_query(&agent, query, target_app.as_deref(), None).await {
                    println!(
                        "{}error: {:#}{}",
                        SetForegroundColor(Color::Red),
                        e,
                        ResetColor
                    );
                }
            }
            Command::App(app) => {
                target_app = app.map(str::to_string);
            }
            Command::History(limit) => {
                let store = JsonlHistoryStore::new(agent.config().storage.history_file());
                match store.recent(limit) {
                    Ok(records) => print_history(&records),
                    Err(e) => println!("Could not read history: {:#}", e),
                }
            }
            Command::Memory => {
                let store = MemoryStore::new(agent.config().storage.memory_file());
                match store.all() {
                    Ok(entries) => print_memories(&entries),
                    Err(e) => println!("Could not read memory: {:#}", e),
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Exit => break,
            Command::Unknown(name) => println!("Unknown command /{}. Try /help.", name),
        }
    }

    if let Some(path) = history_path() {
        if let Err(e) = input.persist_history(&path).await {
            debug!("{:#}", e);
        }
    }
    agent.wait_for_background_tasks().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("  "), Command::Empty);
        assert_eq!(parse_command("open notes"), Command::Run("open notes"));
        assert_eq!(parse_command("/app Safari"), Command::App(Some("Safari")));
        assert_eq!(parse_command("/app"), Command::App(None));
        assert_eq!(parse_command("/history 3"), Command::History(3));
        assert_eq!(parse_command("/history lots"), Command::History(10));
        assert_eq!(parse_command("/quit"), Command::Exit);
        assert_eq!(parse_command("/frobnicate"), Command::Unknown("frobnicate"));
    }

    #[test]
    fn test_app_names_keep_inner_spaces() {
        assert_eq!(
            parse_command("/app Google Chrome"),
            Command::App(Some("Google Chrome"))
        );
    }
}
