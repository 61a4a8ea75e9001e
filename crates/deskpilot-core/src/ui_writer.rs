use crate::approval::ApprovalRequest;
use crate::tools::integrations::AuthRequired;

/// Interface for UI output operations
/// This trait abstracts all UI operations to allow different implementations
/// (console, overlay window, tests) without coupling the loop to one of them.
///
/// Approval and authentication answers do not come back through this trait:
/// the front end answers through the agent's gates.
pub trait UiWriter: Send + Sync {
    /// Short progress line ("Reading Safari...", "Thinking...")
    fn print_status(&self, message: &str);

    /// Print agent response inline (for streaming)
    fn print_agent_response(&self, content: &str);

    /// Print a tool execution header
    fn print_tool_header(&self, tool_name: &str, tool_args: Option<&serde_json::Value>);

    /// Print the outcome of a tool call
    fn print_tool_result(&self, tool_name: &str, success: bool, summary: &str);

    /// The run's final answer
    fn print_final_response(&self, response: &str);

    /// A tool call is waiting on `ApprovalGate::resolve`
    fn notify_approval_required(&self, request: &ApprovalRequest);

    /// An integration needs the user to connect an account; answered with
    /// `AuthGate::complete`
    fn notify_auth_required(&self, auth: &AuthRequired);

    /// Something the user should know that is not an error (iteration cap,
    /// cancellation)
    fn print_notice(&self, message: &str);

    /// Print a context window status message
    fn print_context_status(&self, _message: &str) {}

    /// Flush any buffered output
    fn flush(&self);
}

/// A no-op implementation for when UI output is not needed
pub struct NullUiWriter;

impl UiWriter for NullUiWriter {
    fn print_status(&self, _message: &str) {}
    fn print_agent_response(&self, _content: &str) {}
    fn print_tool_header(&self, _tool_name: &str, _tool_args: Option<&serde_json::Value>) {}
    fn print_tool_result(&self, _tool_name: &str, _success: bool, _summary: &str) {}
    fn print_final_response(&self, _response: &str) {}
    fn notify_approval_required(&self, _request: &ApprovalRequest) {}
    fn notify_auth_required(&self, _auth: &AuthRequired) {}
    fn print_notice(&self, _message: &str) {}
    fn flush(&self) {}
}
