use std::time::Duration;
use thiserror::Error;

/// Failures raised by the host automation layer.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("{0} is not supported on this platform")]
    Unsupported(String),

    #[error("{command} failed (exit {status}): {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("screenshot processing failed: {0}")]
    Image(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AutomationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AutomationError::Timeout { .. })
    }
}

/// True if `err` (or anything in its chain) is an automation timeout.
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<AutomationError>()
            .map(AutomationError::is_timeout)
            .unwrap_or(false)
    })
}
