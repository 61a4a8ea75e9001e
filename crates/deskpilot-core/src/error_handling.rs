//! Provider error classification and retry with backoff.
//!
//! This module provides:
//! - Classification of errors as recoverable or non-recoverable
//! - Retry logic with exponential backoff and jitter for recoverable errors
//! - Error logging with the request context that produced the failure

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Base delay for exponential backoff (in milliseconds)
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Maximum delay between retries (in milliseconds)
const MAX_RETRY_DELAY_MS: u64 = 10000;

/// Jitter factor (±30%)
const JITTER_FACTOR: f64 = 0.3;

/// Context logged when an operation finally fails
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub provider: String,
    pub model: String,
    /// The last user prompt (truncated for logging)
    pub last_prompt: String,
    pub context_tokens: u32,
    pub run_id: Option<String>,
}

impl ErrorContext {
    pub fn new(
        operation: &str,
        provider: &str,
        model: &str,
        last_prompt: &str,
        run_id: Option<String>,
        context_tokens: u32,
    ) -> Self {
        Self {
            operation: operation.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            last_prompt: truncate_for_logging(last_prompt, 1000),
            context_tokens,
            run_id,
        }
    }

    pub fn log_error(&self, error: &anyhow::Error) {
        error!("=== DESKPILOT ERROR DETAILS ===");
        error!("Operation: {}", self.operation);
        error!("Provider: {} | Model: {}", self.provider, self.model);
        error!("Error: {:#}", error);
        error!("Run ID: {:?}", self.run_id);
        error!("Context Tokens: {}", self.context_tokens);
        error!("Last Prompt: {}", self.last_prompt);
        error!("=== END ERROR DETAILS ===");
    }
}

/// Classification of error types
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorType {
    Recoverable(RecoverableError),
    NonRecoverable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoverableError {
    RateLimit,
    NetworkError,
    /// Server error (5xx)
    ServerError,
    /// Model is busy/overloaded
    ModelBusy,
    Timeout,
}

/// Classify an error as recoverable or non-recoverable
pub fn classify_error(error: &anyhow::Error) -> ErrorType {
    let error_str = format!("{:#}", error).to_lowercase();

    if error_str.contains("rate limit")
        || error_str.contains("rate_limit")
        || error_str.contains("429")
    {
        return ErrorType::Recoverable(RecoverableError::RateLimit);
    }

    if error_str.contains("network")
        || error_str.contains("connection")
        || error_str.contains("dns")
        || error_str.contains("refused")
    {
        return ErrorType::Recoverable(RecoverableError::NetworkError);
    }

    if error_str.contains("500")
        || error_str.contains("502")
        || error_str.contains("503")
        || error_str.contains("504")
        || error_str.contains("server error")
        || error_str.contains("internal error")
    {
        return ErrorType::Recoverable(RecoverableError::ServerError);
    }

    if error_str.contains("busy")
        || error_str.contains("overloaded")
        || error_str.contains("capacity")
        || error_str.contains("unavailable")
    {
        return ErrorType::Recoverable(RecoverableError::ModelBusy);
    }

    if error_str.contains("timeout") || error_str.contains("timed out") {
        return ErrorType::Recoverable(RecoverableError::Timeout);
    }

    ErrorType::NonRecoverable
}

/// Retry budget and backoff bounds.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }
}

/// Calculate retry delay with exponential backoff and jitter
pub fn calculate_retry_delay(attempt: u32, config: &RetryConfig) -> Duration {
    use rand::Rng;

    // delay = base * 2^(attempt-1), capped
    let base_ms = config.base_delay.as_millis() as u64;
    let exp = base_ms.saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(config.max_delay.as_millis() as u64);

    let mut rng = rand::thread_rng();
    let jitter = (capped as f64 * JITTER_FACTOR * rng.gen::<f64>()) as u64;
    let final_delay = if rng.gen_bool(0.5) {
        capped + jitter
    } else {
        capped.saturating_sub(jitter)
    };

    Duration::from_millis(final_delay)
}

/// Retry `operation` while it fails with recoverable errors.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    mut operation: F,
    context: &ErrorContext,
    config: &RetryConfig,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(error) => match classify_error(&error) {
                ErrorType::Recoverable(kind) => {
                    if attempt >= config.max_attempts {
                        error!(
                            "Operation '{}' failed after {} attempts. Giving up.",
                            operation_name, attempt
                        );
                        context.log_error(&error);
                        return Err(error);
                    }

                    let delay = calculate_retry_delay(attempt, config);
                    warn!(
                        "Recoverable error ({:?}) in '{}' (attempt {}/{}). Retrying in {:?}...",
                        kind, operation_name, attempt, config.max_attempts, delay
                    );
                    warn!("Error details: {:#}", error);
                    tokio::time::sleep(delay).await;
                }
                ErrorType::NonRecoverable => {
                    error!(
                        "Non-recoverable error in '{}' (attempt {}). Giving up.",
                        operation_name, attempt
                    );
                    context.log_error(&error);
                    return Err(error);
                }
            },
        }
    }
}

/// Truncate at a UTF-8 boundary for log output
pub(crate) fn truncate_for_logging(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let mut truncate_at = max_len;
    while truncate_at > 0 && !s.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }

    format!(
        "{}... (truncated, {} total bytes)",
        &s[..truncate_at],
        s.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_retries(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn context() -> ErrorContext {
        ErrorContext::new("stream", "mock", "mock-model", "open notes", None, 100)
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            classify_error(&anyhow!("HTTP 429 Too Many Requests")),
            ErrorType::Recoverable(RecoverableError::RateLimit)
        );
        assert_eq!(
            classify_error(&anyhow!("Network connection failed")),
            ErrorType::Recoverable(RecoverableError::NetworkError)
        );
        assert_eq!(
            classify_error(&anyhow!("HTTP 503 Service Unavailable")),
            ErrorType::Recoverable(RecoverableError::ServerError)
        );
        assert_eq!(
            classify_error(&anyhow!("Model is overloaded")),
            ErrorType::Recoverable(RecoverableError::ModelBusy)
        );
        assert_eq!(
            classify_error(&anyhow!("Request timed out")),
            ErrorType::Recoverable(RecoverableError::Timeout)
        );
        assert_eq!(classify_error(&anyhow!("Invalid API key")), ErrorType::NonRecoverable);
    }

    #[test]
    fn test_classification_sees_context_chain() {
        let err = anyhow!("status 502").context("Anthropic request failed");
        assert_eq!(
            classify_error(&err),
            ErrorType::Recoverable(RecoverableError::ServerError)
        );
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let config = RetryConfig::default();
        let delay1 = calculate_retry_delay(1, &config);
        assert!(delay1.as_millis() >= 700 && delay1.as_millis() <= 1300);

        let delay_max = calculate_retry_delay(10, &config);
        assert!(delay_max.as_millis() <= (MAX_RETRY_DELAY_MS as f64 * 1.3) as u128);
    }

    #[tokio::test]
    async fn test_retry_with_recoverable_error() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(
            "stream",
            || {
                let counter = Arc::clone(&attempts);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("Rate limit exceeded"))
                    } else {
                        Ok("Success")
                    }
                }
            },
            &context(),
            &fast_retries(3),
        )
        .await;

        assert_eq!(result.unwrap(), "Success");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_non_recoverable_error() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<&str> = retry_with_backoff(
            "stream",
            || {
                let counter = Arc::clone(&attempts);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("Invalid API key"))
                }
            },
            &context(),
            &fast_retries(3),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = retry_with_backoff(
            "stream",
            || {
                let counter = Arc::clone(&attempts);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("HTTP 500"))
                }
            },
            &context(),
            &fast_retries(2),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_truncate_with_multibyte_chars() {
        assert_eq!(truncate_for_logging("Hello", 20), "Hello");
        let truncated = truncate_for_logging("Some text ┌─────┐ more text", 12);
        assert!(truncated.starts_with("Some text"));
        assert!(truncated.contains("truncated"));
    }
}
