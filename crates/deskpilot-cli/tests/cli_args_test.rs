//! Argument parsing of the deskpilot command line.

use clap::Parser;
use deskpilot_cli::Cli;

#[test]
fn test_query_with_context_flags() {
    let cli = Cli::try_parse_from([
        "deskpilot",
        "--app",
        "Google Chrome",
        "--selection",
        "quarterly numbers",
        "--auto-approve",
        "summarise the selection",
    ])
    .unwrap();

    assert_eq!(cli.app.as_deref(), Some("Google Chrome"));
    assert_eq!(cli.selection.as_deref(), Some("quarterly numbers"));
    assert!(cli.auto_approve);
    assert_eq!(cli.query.as_deref(), Some("summarise the selection"));
    assert!(cli.history.is_none());
}

#[test]
fn test_no_query_means_interactive() {
    let cli = Cli::try_parse_from(["deskpilot", "-v"]).unwrap();
    assert!(cli.verbose);
    assert!(cli.query.is_none());
    assert!(!cli.auto_approve);
}

#[test]
fn test_history_flag_default_and_explicit() {
    let cli = Cli::try_parse_from(["deskpilot", "--history"]).unwrap();
    assert_eq!(cli.history, Some(10));

    let cli = Cli::try_parse_from(["deskpilot", "--history", "3"]).unwrap();
    assert_eq!(cli.history, Some(3));
}

#[test]
fn test_provider_and_model_overrides() {
    let cli = Cli::try_parse_from([
        "deskpilot",
        "--provider",
        "openai.default",
        "--model",
        "gpt-4o",
        "--config",
        "/tmp/deskpilot.toml",
        "hi",
    ])
    .unwrap();
    assert_eq!(cli.provider.as_deref(), Some("openai.default"));
    assert_eq!(cli.model.as_deref(), Some("gpt-4o"));
    assert_eq!(cli.config.as_deref(), Some("/tmp/deskpilot.toml"));
}

#[test]
fn test_unknown_flag_is_rejected() {
    assert!(Cli::try_parse_from(["deskpilot", "--autonomous"]).is_err());
}
