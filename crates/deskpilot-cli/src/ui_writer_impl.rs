use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crossterm::style::{Color, ResetColor, SetForegroundColor};
use deskpilot_core::{ApprovalGate, ApprovalRequest, AuthGate, AuthRequired, UiWriter};
use termimad::MadSkin;
use tracing::{debug, warn};

use crate::line_input::{LineReader, ReadOutcome};

/// Longest argument value shown in a tool header.
const MAX_HEADER_VALUE: usize = 80;

/// Console implementation of UiWriter that prints to stdout.
///
/// Approval and authentication prompts are answered through the same line
/// reader as the REPL, from a task that resolves the agent's gates; the run
/// itself never blocks on the terminal. A prompt whose request is cancelled
/// is withdrawn and whatever the user types next goes to the REPL.
pub struct ConsoleUiWriter {
    auto_approve: bool,
    input: Arc<LineReader>,
    gates: Mutex<Option<(Arc<ApprovalGate>, Arc<AuthGate>)>>,
    response_open: Mutex<bool>,
}

impl ConsoleUiWriter {
    pub fn new(auto_approve: bool, input: Arc<LineReader>) -> Self {
        Self {
            auto_approve,
            input,
            gates: Mutex::new(None),
            response_open: Mutex::new(false),
        }
    }

    /// Connect prompts to the agent's gates. Must be called before the first run.
    pub fn attach(&self, approval: Arc<ApprovalGate>, auth: Arc<AuthGate>) {
        *self.gates.lock().unwrap_or_else(|p| p.into_inner()) = Some((approval, auth));
    }

    fn gates(&self) -> Option<(Arc<ApprovalGate>, Arc<AuthGate>)> {
        self.gates.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// End a streamed response line before printing anything else.
    fn close_response(&self) {
        let mut open = self.response_open.lock().unwrap_or_else(|p| p.into_inner());
        if *open {
            println!();
            *open = false;
        }
    }
}

/// First line of `value`, shortened for a one-line header.
pub fn header_value(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let first_line = text.lines().next().unwrap_or("");
    match first_line.char_indices().nth(MAX_HEADER_VALUE - 3) {
        Some((idx, _)) => format!("{}...", &first_line[..idx]),
        None => first_line.to_string(),
    }
}

/// Argument shown next to the tool name.
fn important_arg(args: &serde_json::Value) -> Option<String> {
    let object = args.as_object()?;
    ["app", "keys", "text", "script", "query", "fact", "path"]
        .iter()
        .find_map(|key| object.get(*key))
        .or_else(|| object.values().next())
        .map(header_value)
}

/// Normalised answer text; `None` for Ctrl-C, end of input or a read error.
fn answer(outcome: Result<ReadOutcome, anyhow::Error>) -> Option<String> {
    match outcome {
        Ok(ReadOutcome::Line(line)) => Some(line.trim().to_lowercase()),
        Ok(_) => None,
        Err(e) => {
            warn!("Could not read answer: {:#}", e);
            None
        }
    }
}

impl UiWriter for ConsoleUiWriter {
    fn print_status(&self, message: &str) {
        self.close_response();
        println!("\x1b[2m{}\x1b[0m", message);
    }

    fn print_agent_response(&self, content: &str) {
        *self.response_open.lock().unwrap_or_else(|p| p.into_inner()) = true;
        print!("{}", content);
        let _ = io::stdout().flush();
    }

    fn print_tool_header(&self, tool_name: &str, tool_args: Option<&serde_json::Value>) {
        self.close_response();
        match tool_args.and_then(important_arg) {
            Some(value) => println!(
                "┌─\x1b[1;32m {}\x1b[0m\x1b[35m | {}\x1b[0m",
                tool_name, value
            ),
            None => println!("┌─\x1b[1;32m {}\x1b[0m", tool_name),
        }
    }

    fn print_tool_result(&self, _tool_name: &str, success: bool, summary: &str) {
        let color = if success { Color::Reset } else { Color::Red };
        let first_line = summary.lines().next().unwrap_or("");
        println!(
            "└─ {}{}{}",
            SetForegroundColor(color),
            first_line,
            ResetColor
        );
    }

    fn print_final_response(&self, response: &str) {
        self.close_response();

        let mut skin = MadSkin::default();
        skin.bold.set_fg(termimad::crossterm::style::Color::Green);
        skin.italic.set_fg(termimad::crossterm::style::Color::Cyan);
        skin.inline_code.set_fg(termimad::crossterm::style::Color::Yellow);

        println!();
        print!("{}", skin.term_text(response));
        let _ = io::stdout().flush();
    }

    fn notify_approval_required(&self, request: &ApprovalRequest) {
        self.close_response();
        let Some((approval, _)) = self.gates() else {
            debug!("No approval gate attached; request stays pending");
            return;
        };

        if self.auto_approve {
            println!("\x1b[2m(auto-approved {})\x1b[0m", request.display_name);
            approval.resolve(true);
            return;
        }

        let kind = if request.is_external_integration {
            "integration"
        } else {
            "action"
        };
        println!(
            "{}? Allow {} {}: {}{}",
            SetForegroundColor(Color::Yellow),
            kind,
            request.display_name,
            request.description,
            ResetColor
        );
        if let Some(ref details) = request.details {
            for line in details.lines() {
                println!("  \x1b[2m{}\x1b[0m", line);
            }
        }
        let _ = io::stdout().flush();

        let input = Arc::clone(&self.input);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = approval.settled() => {
                    println!("\n\x1b[2m(approval request withdrawn)\x1b[0m");
                }
                outcome = input.read_line("Approve? [y/N] ") => {
                    let approved = matches!(answer(outcome).as_deref(), Some("y") | Some("yes"));
                    approval.resolve(approved);
                }
            }
        });
    }

    fn notify_auth_required(&self, auth: &AuthRequired) {
        self.close_response();
        let Some((_, auth_gate)) = self.gates() else {
            debug!("No auth gate attached; request stays pending");
            return;
        };

        println!(
            "{}Connect your {} account to continue.{}",
            SetForegroundColor(Color::Yellow),
            auth.toolkit,
            ResetColor
        );
        if let Some(ref url) = auth.redirect_url {
            println!("  {}", url);
        }
        let _ = io::stdout().flush();

        let input = Arc::clone(&self.input);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = auth_gate.settled() => {
                    println!("\n\x1b[2m(connection request withdrawn)\x1b[0m");
                }
                outcome = input.read_line("Press Enter when connected, or type 'n' to skip: ") => {
                    match answer(outcome).as_deref() {
                        Some("n") | Some("no") | None => auth_gate.cancel(),
                        Some(_) => {
                            auth_gate.complete();
                        }
                    }
                }
            }
        });
    }

    fn print_notice(&self, message: &str) {
        self.close_response();
        println!(
            "{}{}{}",
            SetForegroundColor(Color::Yellow),
            message,
            ResetColor
        );
    }

    fn print_context_status(&self, message: &str) {
        self.close_response();
        println!("\x1b[2m{}\x1b[0m", message);
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_input::ScriptedLines;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_header_value_truncates_first_line() {
        assert_eq!(header_value(&json!("line one\nline two")), "line one");
        let long = "x".repeat(200);
        let shown = header_value(&json!(long));
        assert_eq!(shown.chars().count(), MAX_HEADER_VALUE);
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn test_important_arg_prefers_known_keys() {
        assert_eq!(
            important_arg(&json!({"x": 1, "app": "Notes"})).as_deref(),
            Some("Notes")
        );
        assert_eq!(important_arg(&json!({"x": 1})).as_deref(), Some("1"));
        assert_eq!(important_arg(&json!({})), None);
    }

    fn click_request() -> ApprovalRequest {
        ApprovalRequest {
            tool_name: "click".to_string(),
            description: "Click at (1, 2)".to_string(),
            args: json!({"x": 1, "y": 2}),
            is_external_integration: false,
            display_name: "Click".to_string(),
            details: None,
        }
    }

    type Attached = (
        mpsc::Sender<String>,
        Arc<LineReader>,
        ConsoleUiWriter,
        Arc<ApprovalGate>,
        Arc<AuthGate>,
    );

    fn attached_writer(auto_approve: bool) -> Attached {
        let (feed, reader) = ScriptedLines::reader();
        let input = Arc::new(reader);
        let writer = ConsoleUiWriter::new(auto_approve, Arc::clone(&input));
        let approval = Arc::new(ApprovalGate::new());
        let auth = Arc::new(AuthGate::new());
        writer.attach(approval.clone(), auth.clone());
        (feed, input, writer, approval, auth)
    }

    #[tokio::test]
    async fn test_auto_approve_resolves_gate() {
        let (_feed, _input, writer, approval, _) = attached_writer(true);

        let pending = approval.open(click_request()).unwrap();
        writer.notify_approval_required(&click_request());
        assert!(pending.wait().await);
    }

    #[tokio::test]
    async fn test_typed_answer_resolves_gate() {
        let (feed, _input, writer, approval, _) = attached_writer(false);

        let pending = approval.open(click_request()).unwrap();
        writer.notify_approval_required(&click_request());
        feed.send(" Yes ".to_string()).unwrap();
        assert!(pending.wait().await);
    }

    #[tokio::test]
    async fn test_line_after_cancelled_approval_reaches_repl() {
        let (feed, input, writer, approval, _) = attached_writer(false);

        let pending = approval.open(click_request()).unwrap();
        writer.notify_approval_required(&click_request());
        tokio::time::sleep(Duration::from_millis(20)).await;
        approval.cancel();
        assert!(!pending.wait().await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        feed.send("summarise this page".to_string()).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), input.read_line("deskpilot> "))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, ReadOutcome::Line("summarise this page".to_string()));
        assert!(!approval.is_pending());
    }

    #[tokio::test]
    async fn test_line_after_cancelled_auth_reaches_repl() {
        let (feed, input, writer, _, auth) = attached_writer(false);

        let required = AuthRequired {
            toolkit: "notion".to_string(),
            redirect_url: Some("https://example.com/connect".to_string()),
        };
        let pending = auth.open(required.clone()).unwrap();
        writer.notify_auth_required(&required);
        auth.cancel();
        assert!(!pending.wait().await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        feed.send("/history".to_string()).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), input.read_line("deskpilot> "))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, ReadOutcome::Line("/history".to_string()));
    }
}
