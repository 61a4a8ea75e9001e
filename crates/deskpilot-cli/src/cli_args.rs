//! CLI argument parsing for deskpilot.

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "deskpilot")]
#[command(about = "A desktop copilot that reads and operates the application you are working in")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Override the configured provider (e.g., 'anthropic.default' or 'openai.default')
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Override the model for the selected provider
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Application to work in (defaults to the frontmost application)
    #[arg(long, value_name = "APP")]
    pub app: Option<String>,

    /// Text the user has selected, passed along with the request
    #[arg(long, value_name = "TEXT")]
    pub selection: Option<String>,

    /// Approve every tool call without prompting
    #[arg(long)]
    pub auto_approve: bool,

    /// Disable desktop control tools; the agent can only read state and answer
    #[arg(long)]
    pub no_computer_control: bool,

    /// Print the most recent runs and exit
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "10")]
    pub history: Option<usize>,

    /// Request to carry out (if omitted, starts an interactive session)
    pub query: Option<String>,
}
