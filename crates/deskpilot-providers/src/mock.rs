#![allow(dead_code)]
//! Mock LLM Provider for Testing
//!
//! This module provides a configurable mock provider that can simulate
//! various LLM behaviors for integration testing. It allows precise control
//! over streaming chunks, tool calls, and response patterns.
//!
//! # Example
//!
//! ```rust,ignore
//! use deskpilot_providers::mock::{MockProvider, MockResponse};
//!
//! // Simple text-only response
//! let provider = MockProvider::new()
//!     .with_response(MockResponse::text("Done."));
//!
//! // Response with a native tool call
//! let provider = MockProvider::new()
//!     .with_response(MockResponse::native_tool_call("click", json!({"x": 10, "y": 20})));
//! ```

use crate::{
    CompletionChunk, CompletionRequest, CompletionResponse, CompletionStream, CoordinateConvention,
    LLMProvider, ToolCall, Usage,
};
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;

/// Global counter for generating unique tool call IDs
static TOOL_CALL_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_tool_call_id() -> String {
    format!("tool_{}", TOOL_CALL_COUNTER.fetch_add(1, Ordering::SeqCst))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A mock response that can be configured for testing
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub chunks: Vec<MockChunk>,
    pub usage: Usage,
}

/// A single chunk in a mock streaming response
#[derive(Debug, Clone)]
pub struct MockChunk {
    pub content: String,
    pub finished: bool,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub stop_reason: Option<String>,
    pub tool_call_streaming: Option<String>,
}

impl MockChunk {
    /// Create a content chunk (not finished)
    pub fn content(text: &str) -> Self {
        Self {
            content: text.to_string(),
            finished: false,
            tool_calls: None,
            stop_reason: None,
            tool_call_streaming: None,
        }
    }

    /// Create a final chunk with stop reason
    pub fn finished(stop_reason: &str) -> Self {
        Self {
            content: String::new(),
            finished: true,
            tool_calls: None,
            stop_reason: Some(stop_reason.to_string()),
            tool_call_streaming: None,
        }
    }

    /// Create a chunk with a tool call
    pub fn tool_call(tool: &str, args: serde_json::Value) -> Self {
        Self::tool_calls(vec![(tool, args)])
    }

    /// Create a chunk carrying several tool calls in order
    pub fn tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        Self {
            content: String::new(),
            finished: false,
            tool_calls: Some(
                calls
                    .into_iter()
                    .map(|(tool, args)| ToolCall {
                        id: next_tool_call_id(),
                        tool: tool.to_string(),
                        args,
                    })
                    .collect(),
            ),
            stop_reason: None,
            tool_call_streaming: None,
        }
    }

    /// Create a chunk indicating tool call is streaming (for UI hint)
    pub fn tool_streaming(tool_name: &str) -> Self {
        Self {
            content: String::new(),
            finished: false,
            tool_calls: None,
            stop_reason: None,
            tool_call_streaming: Some(tool_name.to_string()),
        }
    }
}

fn estimated_usage(completion_chars: usize) -> Usage {
    let completion_tokens = completion_chars as u32 / 4;
    Usage {
        prompt_tokens: 100,
        completion_tokens,
        total_tokens: 100 + completion_tokens,
    }
}

impl MockResponse {
    /// Create a simple text-only response (single chunk + finish)
    pub fn text(content: &str) -> Self {
        Self {
            chunks: vec![MockChunk::content(content), MockChunk::finished("end_turn")],
            usage: estimated_usage(content.len()),
        }
    }

    /// Create a streaming text response with multiple chunks
    pub fn streaming(chunks: Vec<&str>) -> Self {
        let total_len: usize = chunks.iter().map(|c| c.len()).sum();
        let mut mock_chunks: Vec<MockChunk> = chunks.into_iter().map(MockChunk::content).collect();
        mock_chunks.push(MockChunk::finished("end_turn"));

        Self {
            chunks: mock_chunks,
            usage: estimated_usage(total_len),
        }
    }

    /// Create a response with a native tool call
    pub fn native_tool_call(tool: &str, args: serde_json::Value) -> Self {
        Self {
            chunks: vec![
                MockChunk::tool_streaming(tool),
                MockChunk::tool_call(tool, args),
                MockChunk::finished("tool_use"),
            ],
            usage: estimated_usage(200),
        }
    }

    /// Create a response with several native tool calls in one turn
    pub fn native_tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        Self {
            chunks: vec![MockChunk::tool_calls(calls), MockChunk::finished("tool_use")],
            usage: estimated_usage(200),
        }
    }

    /// Create a response with text followed by a native tool call
    pub fn text_then_native_tool(text: &str, tool: &str, args: serde_json::Value) -> Self {
        Self {
            chunks: vec![
                MockChunk::content(text),
                MockChunk::tool_streaming(tool),
                MockChunk::tool_call(tool, args),
                MockChunk::finished("tool_use"),
            ],
            usage: estimated_usage(200 + text.len()),
        }
    }

    /// Create a response that gets cut off by max_tokens
    pub fn truncated(content: &str) -> Self {
        Self {
            chunks: vec![MockChunk::content(content), MockChunk::finished("max_tokens")],
            usage: estimated_usage(content.len()),
        }
    }

    /// Create a custom response with explicit chunks
    pub fn custom(chunks: Vec<MockChunk>, usage: Usage) -> Self {
        Self { chunks, usage }
    }
}

/// A mock LLM provider for testing
///
/// The provider maintains a queue of responses that are returned in order.
/// It also tracks all requests made for verification in tests.
pub struct MockProvider {
    name: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    native_tool_calling: bool,
    context_window: Option<u32>,
    convention: CoordinateConvention,
    credentials_valid: bool,
    /// Queue of responses to return (FIFO)
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// All requests received (for verification)
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    /// Default response when queue is empty
    default_response: Option<MockResponse>,
    /// When set, each stream waits for one notification before emitting chunks
    gate: Option<Arc<Notify>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            model: "mock-model".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            native_tool_calling: true,
            context_window: None,
            convention: CoordinateConvention::Pixel,
            credentials_valid: true,
            responses: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: None,
            gate: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_native_tool_calling(mut self, enabled: bool) -> Self {
        self.native_tool_calling = enabled;
        self
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn with_coordinate_convention(mut self, convention: CoordinateConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Make `validate_credentials` fail, as a provider with no API key would.
    pub fn with_invalid_credentials(mut self) -> Self {
        self.credentials_valid = false;
        self
    }

    /// Hold every stream until the gate is notified once per stream.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Add a response to the queue
    pub fn with_response(self, response: MockResponse) -> Self {
        lock(&self.responses).push(response);
        self
    }

    /// Add multiple responses to the queue
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        lock(&self.responses).extend(responses);
        self
    }

    /// Set a default response when queue is empty
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = Some(response);
        self
    }

    /// Shared handle on the recorded requests, usable after the provider
    /// has been moved into a registry.
    pub fn request_log(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }

    pub fn get_requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next_response(&self) -> MockResponse {
        let mut responses = lock(&self.responses);
        if responses.is_empty() {
            self.default_response
                .clone()
                .unwrap_or_else(|| MockResponse::text("Mock response (no responses configured)"))
        } else {
            responses.remove(0)
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LLMProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        lock(&self.requests).push(request);

        let response = self.next_response();
        let content: String = response.chunks.iter().map(|c| c.content.as_str()).collect();

        Ok(CompletionResponse {
            content,
            usage: response.usage,
            model: self.model.clone(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        lock(&self.requests).push(request);

        let response = self.next_response();
        let usage = response.usage.clone();
        let gate = self.gate.clone();

        let (tx, rx) = mpsc::channel(32);
        let num_chunks = response.chunks.len();

        tokio::spawn(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }

            for (i, chunk) in response.chunks.into_iter().enumerate() {
                let is_last = chunk.finished;
                let completion_chunk = CompletionChunk {
                    content: chunk.content,
                    finished: chunk.finished,
                    tool_calls: chunk.tool_calls,
                    usage: if is_last { Some(usage.clone()) } else { None },
                    stop_reason: chunk.stop_reason,
                    tool_call_streaming: chunk.tool_call_streaming,
                };

                if tx.send(Ok(completion_chunk)).await.is_err() {
                    break;
                }

                if i < num_chunks - 1 {
                    tokio::time::sleep(tokio::time::Duration::from_micros(100)).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_native_tool_calling(&self) -> bool {
        self.native_tool_calling
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }

    fn context_window_size(&self) -> Option<u32> {
        self.context_window
    }

    fn coordinate_convention(&self) -> CoordinateConvention {
        self.convention
    }

    fn validate_credentials(&self) -> Result<()> {
        if self.credentials_valid {
            Ok(())
        } else {
            anyhow::bail!("No API key configured for provider '{}'", self.name)
        }
    }
}

// ============================================================================
// Preset Scenarios for Common Test Cases
// ============================================================================

/// Preset scenarios for common testing patterns
pub mod scenarios {
    use super::*;

    /// A provider that answers with plain text and never calls a tool
    pub fn text_only_response(text: &str) -> MockProvider {
        MockProvider::new().with_response(MockResponse::text(text))
    }

    /// Each call returns the next response in sequence
    pub fn multi_turn(responses: Vec<&str>) -> MockProvider {
        let mock_responses: Vec<MockResponse> =
            responses.into_iter().map(MockResponse::text).collect();
        MockProvider::new().with_responses(mock_responses)
    }

    /// First call returns a tool call, second call returns the final answer
    pub fn tool_then_response(
        tool: &str,
        args: serde_json::Value,
        final_response: &str,
    ) -> MockProvider {
        MockProvider::new().with_responses(vec![
            MockResponse::native_tool_call(tool, args),
            MockResponse::text(final_response),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn empty_request(stream: bool) -> CompletionRequest {
        CompletionRequest {
            messages: vec![],
            max_tokens: None,
            temperature: None,
            stream,
            tools: None,
        }
    }

    #[tokio::test]
    async fn test_mock_provider_text_response() {
        let provider = MockProvider::new().with_response(MockResponse::text("Hello, world!"));

        let response = provider.complete(empty_request(false)).await.unwrap();
        assert_eq!(response.content, "Hello, world!");
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_streaming() {
        let provider =
            MockProvider::new().with_response(MockResponse::streaming(vec!["Hello, ", "world!"]));

        let mut stream = provider.stream(empty_request(true)).await.unwrap();

        let mut content = String::new();
        let mut chunk_count = 0;
        while let Some(chunk) = stream.next().await {
            content.push_str(&chunk.unwrap().content);
            chunk_count += 1;
        }

        assert_eq!(content, "Hello, world!");
        assert_eq!(chunk_count, 3); // 2 content chunks + 1 finish chunk
    }

    #[tokio::test]
    async fn test_mock_provider_multiple_tool_calls_keep_order() {
        let provider = MockProvider::new().with_response(MockResponse::native_tool_calls(vec![
            ("click", serde_json::json!({"x": 1, "y": 2})),
            ("type_text", serde_json::json!({"text": "hi"})),
        ]));

        let mut stream = provider.stream(empty_request(true)).await.unwrap();
        let mut names = Vec::new();
        while let Some(chunk) = stream.next().await {
            if let Some(calls) = chunk.unwrap().tool_calls {
                names.extend(calls.into_iter().map(|c| c.tool));
            }
        }
        assert_eq!(names, vec!["click", "type_text"]);
    }

    #[tokio::test]
    async fn test_gate_holds_stream_until_notified() {
        let gate = Arc::new(Notify::new());
        let provider = MockProvider::new()
            .with_gate(gate.clone())
            .with_response(MockResponse::text("released"));

        let mut stream = provider.stream(empty_request(true)).await.unwrap();
        let early = tokio::time::timeout(std::time::Duration::from_millis(20), stream.next()).await;
        assert!(early.is_err(), "no chunk should arrive before the gate opens");

        gate.notify_one();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.content, "released");
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let provider = MockProvider::new().with_invalid_credentials();
        assert!(provider.validate_credentials().is_err());
        assert!(MockProvider::new().validate_credentials().is_ok());
    }
}
