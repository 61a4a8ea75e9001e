//! Streaming behaviour of the mock provider and the wire shape of messages.

use std::sync::Arc;
use std::time::Duration;

use deskpilot_providers::{
    CompletionRequest, CoordinateConvention, ImageContent, LLMProvider, Message, MessageRole,
    MockProvider, MockResponse, ToolCall,
};
use serde_json::json;
use tokio::sync::Notify;
use tokio_stream::StreamExt;

fn request(text: &str) -> CompletionRequest {
    CompletionRequest {
        messages: vec![Message::new(MessageRole::User, text.to_string())],
        max_tokens: None,
        temperature: None,
        stream: true,
        tools: None,
    }
}

#[tokio::test]
async fn test_tool_call_stream_ends_with_tool_use() {
    let provider = MockProvider::new()
        .with_response(MockResponse::native_tool_call("click", json!({"x": 10, "y": 20})));

    let mut stream = provider.stream(request("click it")).await.unwrap();
    let mut calls = Vec::new();
    let mut stop_reason = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        if let Some(tool_calls) = chunk.tool_calls {
            calls.extend(tool_calls);
        }
        if chunk.finished {
            stop_reason = chunk.stop_reason;
        }
    }

    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "click");
    assert_eq!(calls[0].args["x"], 10);
    assert!(!calls[0].id.is_empty());
    assert_eq!(stop_reason.as_deref(), Some("tool_use"));
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn test_gated_stream_waits_for_release() {
    let gate = Arc::new(Notify::new());
    let provider = MockProvider::new()
        .with_gate(Arc::clone(&gate))
        .with_response(MockResponse::text("released"));

    let mut stream = provider.stream(request("hold")).await.unwrap();
    let early = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
    assert!(early.is_err(), "stream produced output before the gate opened");

    gate.notify_one();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.content, "released");
}

#[tokio::test]
async fn test_complete_shares_the_response_queue() {
    let provider = MockProvider::new().with_responses(vec![
        MockResponse::text("first"),
        MockResponse::text("second"),
    ]);

    assert_eq!(provider.complete(request("a")).await.unwrap().content, "first");
    assert_eq!(provider.complete(request("b")).await.unwrap().content, "second");
    assert_eq!(
        provider.complete(request("c")).await.unwrap().content,
        "Mock response (no responses configured)"
    );
}

#[test]
fn test_provider_declares_its_conventions() {
    let provider = MockProvider::new()
        .with_coordinate_convention(CoordinateConvention::NormalizedGrid)
        .with_invalid_credentials();

    assert_eq!(provider.coordinate_convention(), CoordinateConvention::NormalizedGrid);
    let err = provider.validate_credentials().unwrap_err();
    assert!(err.to_string().contains("No API key"));
}

#[test]
fn test_message_serialization_omits_empty_parts() {
    let plain = serde_json::to_value(Message::new(MessageRole::User, "hi".to_string())).unwrap();
    assert_eq!(plain, json!({"role": "user", "content": "hi"}));

    let tool = Message::tool_result(
        "call_1",
        "Screenshot taken".to_string(),
        vec![ImageContent::new("image/png", "aGVsbG8=".to_string())],
    );
    let value = serde_json::to_value(&tool).unwrap();
    assert_eq!(value["role"], "tool");
    assert_eq!(value["tool_call_id"], "call_1");
    assert_eq!(value["images"][0]["media_type"], "image/png");
    assert!(value.get("tool_calls").is_none());

    let assistant = Message::assistant_with_tool_calls(
        String::new(),
        vec![ToolCall {
            id: "call_2".to_string(),
            tool: "scroll".to_string(),
            args: json!({"direction": "down"}),
        }],
    );
    let value = serde_json::to_value(&assistant).unwrap();
    assert_eq!(value["tool_calls"][0]["tool"], "scroll");
    assert!(value.get("tool_call_id").is_none());
}
