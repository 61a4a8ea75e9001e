//! Utility functions for the deskpilot CLI.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use deskpilot_computer_control::{create_controller, HostTimeouts};
use deskpilot_config::Config;
use deskpilot_core::{register_providers, Agent, AgentBuilder};
use tracing::debug;

use crate::cli_args::Cli;
use crate::line_input::LineReader;
use crate::ui_writer_impl::ConsoleUiWriter;

/// Crates whose log level follows `--verbose`.
const WORKSPACE_CRATES: [&str; 5] = [
    "deskpilot_cli",
    "deskpilot_core",
    "deskpilot_providers",
    "deskpilot_config",
    "deskpilot_computer_control",
];

pub fn initialize_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "warn" };
    let mut filter = EnvFilter::from_default_env();
    for krate in WORKSPACE_CRATES {
        if let Ok(directive) = format!("{}={}", krate, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration with CLI argument overrides applied.
pub fn load_config_with_cli_overrides(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_with_overrides(
        cli.config.as_deref(),
        cli.provider.clone(),
        cli.model.clone(),
    )?;

    if cli.no_computer_control {
        config.computer_control.enabled = false;
    }

    Ok(config)
}

/// Wire an agent to the platform host and the configured providers. Prompts
/// read from `input`.
pub fn build_agent(
    config: Config,
    auto_approve: bool,
    input: Arc<LineReader>,
) -> Result<Arc<Agent<ConsoleUiWriter>>> {
    let cc = &config.computer_control;
    let timeouts = HostTimeouts {
        action: Duration::from_millis(cc.action_timeout_ms),
        script: Duration::from_millis(cc.script_timeout_ms),
        screenshot: Duration::from_millis(cc.screenshot_timeout_ms),
    };
    let host = create_controller(timeouts).context("Failed to initialise desktop control")?;
    let providers = register_providers(&config)?;
    debug!("Registered providers: {:?}", providers.list_providers());

    let ui_writer = ConsoleUiWriter::new(auto_approve, input);
    let agent = Arc::new(AgentBuilder::new(config, providers, host, ui_writer).build());
    agent
        .ui_writer()
        .attach(agent.approval_gate(), agent.auth_gate());
    Ok(agent)
}
