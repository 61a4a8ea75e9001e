//! deskpilot CLI - command-line front end for the desktop copilot.

pub mod display;

mod cli_args;
mod interactive;
mod line_input;
mod ui_writer_impl;
mod utils;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use deskpilot_core::{Agent, AgentError, HistoryStore, JsonlHistoryStore, UiWriter};
use tokio::task::JoinHandle;
use tracing::debug;

pub use cli_args::Cli;
pub use interactive::{parse_command, Command};
pub use line_input::{LineReader, LineSource, ReadOutcome};
pub use ui_writer_impl::ConsoleUiWriter;

use display::print_history;
use interactive::run_interactive;
use utils::{build_agent, initialize_logging, load_config_with_cli_overrides};

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    initialize_logging(cli.verbose);

    let config = load_config_with_cli_overrides(&cli)?;

    if let Some(limit) = cli.history {
        let store = JsonlHistoryStore::new(config.storage.history_file());
        print_history(&store.recent(limit)?);
        return Ok(());
    }

    let input = Arc::new(line_input::terminal()?);
    let agent = build_agent(config, cli.auto_approve, Arc::clone(&input))?;
    let ctrl_c = spawn_ctrl_c_handler(Arc::clone(&agent));

    let result = match cli.query {
        Some(ref query) => {
            let result = run_query(&agent, query, cli.app.as_deref(), cli.selection.as_deref()).await;
            agent.wait_for_background_tasks().await;
            result
        }
        None => run_interactive(Arc::clone(&agent), input, cli.app.clone()).await,
    };

    ctrl_c.abort();
    result
}

/// Ctrl-C cancels the active run instead of killing the process.
fn spawn_ctrl_c_handler<W: UiWriter + 'static>(agent: Arc<Agent<W>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if agent.is_running() {
                agent.cancel();
            } else {
                debug!("Ctrl-C with no active run");
            }
        }
    })
}

/// Run one request. A busy agent is reported, not treated as a failure.
pub(crate) async fn run_query<W: UiWriter>(
    agent: &Agent<W>,
    query: &str,
    app: Option<&str>,
    selection: Option<&str>,
) -> Result<()> {
    match agent.run(query, app, selection).await {
        Ok(_) => {
            println!();
            Ok(())
        }
        Err(AgentError::Busy) => {
            agent
                .ui_writer()
                .print_notice("Another request is still running; try again when it finishes.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
