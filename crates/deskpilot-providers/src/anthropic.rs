//! Anthropic Messages API provider.
//!
//! Screenshots sent to Claude models are downscaled before upload, and the
//! model answers pointer actions in the pixel space of the image it saw.
//! The provider therefore reports [`CoordinateConvention::ScreenshotRelative`].

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::streaming::{make_tool_hint_chunk, SseLineBuffer};
use crate::{
    make_final_chunk, make_text_chunk, CompletionChunk, CompletionRequest, CompletionResponse,
    CompletionStream, CoordinateConvention, LLMProvider, Message, MessageRole, Tool, ToolCall,
    Usage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    name: String,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        Self::new_with_name(
            "anthropic".to_string(),
            api_key,
            model,
            None,
            max_tokens,
            temperature,
        )
    }

    pub fn new_with_name(
        name: String,
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key,
            model: model.unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            max_tokens: max_tokens.unwrap_or(8192),
            temperature: temperature.unwrap_or(0.1),
            name,
        })
    }

    fn create_request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = convert_messages(&request.messages);

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": request.temperature.unwrap_or(self.temperature),
            "messages": messages,
            "stream": stream,
        });

        if let Some(system) = system {
            body["system"] = json!(system);
        }

        if let Some(tools) = request.tools.as_deref() {
            if !tools.is_empty() {
                body["tools"] = json!(convert_tools(tools));
            }
        }

        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "Anthropic API error {}: {}",
                status,
                error_text
            ));
        }
        Ok(response)
    }

    async fn parse_streaming_response(
        mut stream: impl futures_util::Stream<Item = reqwest::Result<Bytes>> + Unpin,
        tx: mpsc::Sender<Result<CompletionChunk>>,
    ) -> Option<Usage> {
        let mut sse = SseLineBuffer::default();
        let mut state = StreamState::default();

        while let Some(chunk_result) = stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    sse.push(&chunk);
                    while let Some(data) = sse.next_data() {
                        match state.handle(&data) {
                            Ok(out) => {
                                for chunk in out {
                                    if tx.send(Ok(chunk)).await.is_err() {
                                        debug!("Receiver dropped, stopping stream");
                                        return state.usage();
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return state.usage();
                            }
                        }
                        if state.done {
                            let usage = state.usage();
                            let _ = tx.send(Ok(state.finish())).await;
                            return usage;
                        }
                    }
                }
                Err(e) => {
                    error!("Stream error: {}", e);
                    let _ = tx.send(Err(anyhow::anyhow!("Stream error: {}", e))).await;
                    return state.usage();
                }
            }
        }

        let usage = state.usage();
        let _ = tx.send(Ok(state.finish())).await;
        usage
    }
}

/// A `tool_use` block whose JSON input is still arriving.
#[derive(Debug, Default)]
struct PartialToolUse {
    id: String,
    name: String,
    input_json: String,
}

impl PartialToolUse {
    fn into_tool_call(self) -> ToolCall {
        let args = if self.input_json.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.input_json).unwrap_or_else(|e| {
                warn!("Malformed tool input for {}: {}", self.name, e);
                serde_json::Value::Null
            })
        };
        ToolCall {
            id: self.id,
            tool: self.name,
            args,
        }
    }
}

/// Accumulates one streamed Messages API response.
#[derive(Debug, Default)]
struct StreamState {
    current_tool: Option<PartialToolUse>,
    tool_calls: Vec<ToolCall>,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
    done: bool,
}

impl StreamState {
    fn handle(&mut self, data: &str) -> Result<Vec<CompletionChunk>> {
        let event: AnthropicStreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                debug!("Failed to parse stream event: {} - Data: {}", e, data);
                return Ok(Vec::new());
            }
        };

        let mut out = Vec::new();
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
            }
            AnthropicStreamEvent::ContentBlockStart { content_block } => {
                if let AnthropicContentBlock::ToolUse { id, name } = content_block {
                    out.push(make_tool_hint_chunk(&name));
                    self.current_tool = Some(PartialToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    });
                }
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => match delta {
                AnthropicDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        out.push(make_text_chunk(text));
                    }
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if let Some(tool) = self.current_tool.as_mut() {
                        tool.input_json.push_str(&partial_json);
                    }
                }
                AnthropicDelta::Other => {}
            },
            AnthropicStreamEvent::ContentBlockStop => {
                if let Some(tool) = self.current_tool.take() {
                    self.tool_calls.push(tool.into_tool_call());
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = Some(reason);
                }
                if let Some(usage) = usage {
                    self.output_tokens = usage.output_tokens;
                }
            }
            AnthropicStreamEvent::MessageStop => {
                self.done = true;
            }
            AnthropicStreamEvent::Error { error } => {
                anyhow::bail!("Anthropic stream error ({}): {}", error.kind, error.message);
            }
            AnthropicStreamEvent::Ping => {}
        }
        Ok(out)
    }

    fn usage(&self) -> Option<Usage> {
        if self.input_tokens == 0 && self.output_tokens == 0 {
            return None;
        }
        Some(Usage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
        })
    }

    fn finish(mut self) -> CompletionChunk {
        if let Some(tool) = self.current_tool.take() {
            self.tool_calls.push(tool.into_tool_call());
        }
        let usage = self.usage();
        make_final_chunk(self.tool_calls, usage, self.stop_reason)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        debug!(
            "Processing Anthropic completion request with {} messages",
            request.messages.len()
        );

        let body = self.create_request_body(&request, false);
        let response: AnthropicResponse = self.post(&body).await?.json().await?;

        let content = response
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text.as_str()),
                AnthropicResponseBlock::Other => None,
            })
            .collect::<String>();

        let usage = Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        };

        Ok(CompletionResponse {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        debug!(
            "Processing Anthropic streaming request with {} messages",
            request.messages.len()
        );

        let body = self.create_request_body(&request, true);
        let response = self.post(&body).await?;

        let stream = response.bytes_stream();
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            if let Some(usage) = Self::parse_streaming_response(stream, tx).await {
                debug!(
                    "Stream completed with usage - prompt: {}, completion: {}, total: {}",
                    usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                );
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
        true
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }

    fn context_window_size(&self) -> Option<u32> {
        Some(200_000)
    }

    fn coordinate_convention(&self) -> CoordinateConvention {
        CoordinateConvention::ScreenshotRelative
    }

    fn validate_credentials(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("No API key configured for provider '{}'", self.name);
        }
        Ok(())
    }
}

fn image_blocks(msg: &Message) -> impl Iterator<Item = serde_json::Value> + '_ {
    msg.images.iter().map(|image| {
        json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.media_type,
                "data": image.data,
            }
        })
    })
}

/// Split out the system prompt and convert the rest to Messages API turns.
/// Consecutive tool results are merged into one user turn, as the API requires.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system: Option<String> = None;
    let mut converted: Vec<serde_json::Value> = Vec::new();
    let mut pending_results: Vec<serde_json::Value> = Vec::new();

    fn flush(pending: &mut Vec<serde_json::Value>, converted: &mut Vec<serde_json::Value>) {
        if !pending.is_empty() {
            converted.push(json!({ "role": "user", "content": std::mem::take(pending) }));
        }
    }

    for msg in messages {
        match msg.role {
            MessageRole::System => {
                system = Some(match system.take() {
                    Some(existing) => format!("{}\n\n{}", existing, msg.content),
                    None => msg.content.clone(),
                });
            }
            MessageRole::User => {
                flush(&mut pending_results, &mut converted);
                let mut blocks = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": msg.content }));
                }
                blocks.extend(image_blocks(msg));
                converted.push(json!({ "role": "user", "content": blocks }));
            }
            MessageRole::Assistant => {
                flush(&mut pending_results, &mut converted);
                let mut blocks = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": msg.content }));
                }
                for call in &msg.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.tool,
                        "input": call.args,
                    }));
                }
                if !blocks.is_empty() {
                    converted.push(json!({ "role": "assistant", "content": blocks }));
                }
            }
            MessageRole::Tool => {
                let mut content = vec![json!({ "type": "text", "text": msg.content })];
                content.extend(image_blocks(msg));
                pending_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": content,
                }));
            }
        }
    }
    flush(&mut pending_results, &mut converted);

    (system, converted)
}

fn convert_tools(tools: &[Tool]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect()
}

// Messages API response structures
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

// Streaming event structures
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicMessageStart,
    },
    ContentBlockStart {
        content_block: AnthropicContentBlock,
    },
    ContentBlockDelta {
        delta: AnthropicDelta,
    },
    ContentBlockStop,
    MessageDelta {
        delta: AnthropicMessageDelta,
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicError,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageStart {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageContent;

    fn feed(state: &mut StreamState, events: &[&str]) -> Vec<CompletionChunk> {
        events
            .iter()
            .flat_map(|e| state.handle(e).unwrap())
            .collect()
    }

    #[test]
    fn test_stream_state_text_and_tool_use() {
        let mut state = StreamState::default();
        let out = feed(
            &mut state,
            &[
                r#"{"type":"message_start","message":{"usage":{"input_tokens":42,"output_tokens":1}}}"#,
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Clicking"}}"#,
                r#"{"type":"content_block_stop","index":0}"#,
                r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"click","input":{}}}"#,
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"x\": 64"}}"#,
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"0, \"y\": 400}"}}"#,
                r#"{"type":"content_block_stop","index":1}"#,
                r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":17}}"#,
                r#"{"type":"message_stop"}"#,
            ],
        );

        assert_eq!(out[0].content, "Clicking");
        assert_eq!(out[1].tool_call_streaming.as_deref(), Some("click"));
        assert!(state.done);

        let last = state.finish();
        assert_eq!(last.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(last.usage.unwrap().total_tokens, 59);
        let calls = last.tool_calls.unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].args, json!({"x": 640, "y": 400}));
    }

    #[test]
    fn test_stream_error_event_is_reported() {
        let mut state = StreamState::default();
        let result = state.handle(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert!(result.unwrap_err().to_string().contains("overloaded_error"));
    }

    #[test]
    fn test_convert_messages_merges_tool_results() {
        let calls = vec![
            ToolCall {
                id: "a".to_string(),
                tool: "click".to_string(),
                args: json!({"x": 1, "y": 2}),
            },
            ToolCall {
                id: "b".to_string(),
                tool: "screenshot".to_string(),
                args: json!({}),
            },
        ];
        let messages = vec![
            Message::new(MessageRole::System, "sys".to_string()),
            Message::new(MessageRole::User, "go".to_string()),
            Message::assistant_with_tool_calls("ok".to_string(), calls),
            Message::tool_result("a", "clicked".to_string(), Vec::new()),
            Message::tool_result(
                "b",
                "captured".to_string(),
                vec![ImageContent::new("image/png", "AAAA".to_string())],
            ),
        ];

        let (system, converted) = convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("sys"));
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1]["content"][1]["type"], "tool_use");

        let results = converted[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "a");
        assert_eq!(results[1]["content"][1]["type"], "image");
    }

    #[test]
    fn test_provider_reports_screenshot_relative() {
        let provider = AnthropicProvider::new("key".to_string(), None, None, None).unwrap();
        assert_eq!(
            provider.coordinate_convention(),
            CoordinateConvention::ScreenshotRelative
        );
        let missing = AnthropicProvider::new(" ".to_string(), None, None, None).unwrap();
        assert!(missing.validate_credentials().is_err());
    }
}
