use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::streaming::{make_tool_hint_chunk, SseLineBuffer};
use crate::{
    make_final_chunk, make_text_chunk, CompletionChunk, CompletionRequest, CompletionResponse,
    CompletionStream, LLMProvider, Message, MessageRole, Tool, ToolCall, Usage,
};

#[derive(Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    context_window: Option<u32>,
    name: String,
}

impl OpenAIProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        Self::new_with_name(
            "openai".to_string(),
            api_key,
            model,
            base_url,
            max_tokens,
            temperature,
        )
    }

    /// Create a provider under a registry name such as `openai_compatible.local`.
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
            model: model.unwrap_or_else(|| "gpt-4o".to_string()),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_tokens,
            temperature,
            context_window: None,
            name,
        })
    }

    pub fn with_context_window(mut self, tokens: Option<u32>) -> Self {
        self.context_window = tokens;
        self
    }

    fn create_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        stream: bool,
        max_tokens: Option<u32>,
    ) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": convert_messages(messages),
            "stream": stream,
        });

        if let Some(max_tokens) = max_tokens.or(self.max_tokens) {
            body["max_completion_tokens"] = json!(max_tokens);
        }

        // Reasoning models reject an explicit temperature, so none is sent.

        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = json!(convert_tools(tools));
            }
        }

        if stream {
            body["stream_options"] = json!({
                "include_usage": true,
            });
        }

        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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
                "OpenAI API error {}: {}",
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
                        if data == "[DONE]" {
                            debug!("Received stream completion marker");
                            let usage = state.usage.clone();
                            let _ = tx.send(Ok(state.finish())).await;
                            return usage;
                        }
                        for out in state.handle(&data) {
                            if tx.send(Ok(out)).await.is_err() {
                                debug!("Receiver dropped, stopping stream");
                                return state.usage;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Stream error: {}", e);
                    let _ = tx.send(Err(anyhow::anyhow!("Stream error: {}", e))).await;
                    return state.usage;
                }
            }
        }

        let usage = state.usage.clone();
        let _ = tx.send(Ok(state.finish())).await;
        usage
    }
}

/// Accumulates one streamed chat completion.
#[derive(Debug, Default)]
struct StreamState {
    tool_calls: Vec<OpenAIStreamingToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl StreamState {
    /// Handle one SSE payload and return the chunks to forward downstream.
    fn handle(&mut self, data: &str) -> Vec<CompletionChunk> {
        let chunk_data = match serde_json::from_str::<OpenAIStreamChunk>(data) {
            Ok(chunk_data) => chunk_data,
            Err(e) => {
                debug!("Failed to parse stream chunk: {} - Data: {}", e, data);
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for choice in chunk_data.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    out.push(make_text_chunk(content));
                }
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let Some(index) = delta.index else { continue };
                while self.tool_calls.len() <= index {
                    self.tool_calls.push(OpenAIStreamingToolCall::default());
                }
                let tool_call = &mut self.tool_calls[index];

                if let Some(id) = delta.id {
                    tool_call.id = Some(id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        out.push(make_tool_hint_chunk(&name));
                        tool_call.name = Some(name);
                    }
                    if let Some(arguments) = function.arguments {
                        tool_call.arguments.push_str(&arguments);
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(convert_finish_reason(&reason));
            }
        }

        if let Some(usage) = chunk_data.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        out
    }

    fn finish(self) -> CompletionChunk {
        let tool_calls = self
            .tool_calls
            .iter()
            .filter_map(|tc| tc.to_tool_call())
            .collect();
        make_final_chunk(tool_calls, self.usage, self.finish_reason)
    }
}

fn convert_finish_reason(reason: &str) -> String {
    match reason {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" => "tool_use".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        debug!(
            "Processing OpenAI completion request with {} messages",
            request.messages.len()
        );

        let body = self.create_request_body(
            &request.messages,
            request.tools.as_deref(),
            false,
            request.max_tokens,
        );

        debug!("Sending request to OpenAI API: model={}", self.model);
        let openai_response: OpenAIResponse = self.post(&body).await?.json().await?;

        let content = openai_response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        let usage = Usage {
            prompt_tokens: openai_response.usage.prompt_tokens,
            completion_tokens: openai_response.usage.completion_tokens,
            total_tokens: openai_response.usage.total_tokens,
        };

        debug!(
            "OpenAI completion successful: {} tokens generated",
            usage.completion_tokens
        );

        Ok(CompletionResponse {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        debug!(
            "Processing OpenAI streaming request with {} messages",
            request.messages.len()
        );

        let body = self.create_request_body(
            &request.messages,
            request.tools.as_deref(),
            true,
            request.max_tokens,
        );

        debug!(
            "Sending streaming request to OpenAI API: model={}",
            self.model
        );
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
        self.max_tokens.unwrap_or(16000)
    }

    fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(0.1)
    }

    fn context_window_size(&self) -> Option<u32> {
        self.context_window.or(Some(128_000))
    }

    fn validate_credentials(&self) -> Result<()> {
        // Local OpenAI-compatible servers commonly run without a key.
        if self.api_key.trim().is_empty() && self.base_url.contains("api.openai.com") {
            anyhow::bail!("No API key configured for provider '{}'", self.name);
        }
        Ok(())
    }
}

fn convert_content(msg: &Message) -> serde_json::Value {
    if msg.images.is_empty() {
        return json!(msg.content);
    }

    let mut parts = Vec::with_capacity(msg.images.len() + 1);
    if !msg.content.is_empty() {
        parts.push(json!({ "type": "text", "text": msg.content }));
    }
    for image in &msg.images {
        parts.push(json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{};base64,{}", image.media_type, image.data) },
        }));
    }
    json!(parts)
}

fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    let mut converted = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            MessageRole::System => {
                converted.push(json!({ "role": "system", "content": msg.content }));
            }
            MessageRole::User => {
                converted.push(json!({ "role": "user", "content": convert_content(msg) }));
            }
            MessageRole::Assistant => {
                let mut value = json!({ "role": "assistant", "content": msg.content });
                if !msg.tool_calls.is_empty() {
                    value["tool_calls"] = json!(msg
                        .tool_calls
                        .iter()
                        .map(|call| json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.tool,
                                "arguments": call.args.to_string(),
                            }
                        }))
                        .collect::<Vec<_>>());
                }
                converted.push(value);
            }
            MessageRole::Tool => {
                converted.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                }));
                // Tool messages cannot carry images; attach them to a follow-up user turn.
                if !msg.images.is_empty() {
                    let carrier = Message::with_images(
                        MessageRole::User,
                        "Screenshot from the previous tool call.".to_string(),
                        msg.images.clone(),
                    );
                    converted.push(json!({ "role": "user", "content": convert_content(&carrier) }));
                }
            }
        }
    }

    converted
}

fn convert_tools(tools: &[Tool]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

// OpenAI API response structures
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: OpenAIUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

// Streaming tool call accumulator
#[derive(Debug, Default)]
struct OpenAIStreamingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl OpenAIStreamingToolCall {
    fn to_tool_call(&self) -> Option<ToolCall> {
        let id = self.id.as_ref()?;
        let name = self.name.as_ref()?;

        let args = if self.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.arguments).unwrap_or(serde_json::Value::Null)
        };

        Some(ToolCall {
            id: id.clone(),
            tool: name.clone(),
            args,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// Streaming response structures
#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIDeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDeltaToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<OpenAIDeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageContent;

    #[test]
    fn test_stream_state_assembles_split_tool_arguments() {
        let mut state = StreamState::default();
        let hints = state.handle(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"click","arguments":"{\"x\":"}}]},"finish_reason":null}]}"#,
        );
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].tool_call_streaming.as_deref(), Some("click"));

        state.handle(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"5,\"y\":7}"}}]},"finish_reason":"tool_calls"}]}"#,
        );
        state.handle(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":4,"total_tokens":14}}"#,
        );

        let last = state.finish();
        assert!(last.finished);
        assert_eq!(last.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(last.usage.unwrap().total_tokens, 14);
        let calls = last.tool_calls.unwrap();
        assert_eq!(calls[0].tool, "click");
        assert_eq!(calls[0].args, json!({"x": 5, "y": 7}));
    }

    #[test]
    fn test_stream_state_forwards_text() {
        let mut state = StreamState::default();
        let out = state.handle(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "Hi");
        assert!(state.handle("not json").is_empty());
    }

    #[test]
    fn test_convert_messages_tool_result_with_screenshot() {
        let call = ToolCall {
            id: "call_1".to_string(),
            tool: "screenshot".to_string(),
            args: json!({}),
        };
        let messages = vec![
            Message::assistant_with_tool_calls(String::new(), vec![call]),
            Message::tool_result(
                "call_1",
                "captured".to_string(),
                vec![ImageContent::new("image/png", "AAAA".to_string())],
            ),
        ];

        let converted = convert_messages(&messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0]["tool_calls"][0]["function"]["name"], "screenshot");
        assert_eq!(converted[1]["role"], "tool");
        assert_eq!(converted[1]["tool_call_id"], "call_1");
        assert_eq!(converted[2]["role"], "user");
        assert_eq!(converted[2]["content"][1]["type"], "image_url");
    }

    #[test]
    fn test_validate_credentials() {
        let hosted = OpenAIProvider::new(String::new(), None, None, None, None).unwrap();
        assert!(hosted.validate_credentials().is_err());

        let local = OpenAIProvider::new(
            String::new(),
            None,
            Some("http://localhost:11434/v1".to_string()),
            None,
            None,
        )
        .unwrap();
        assert!(local.validate_credentials().is_ok());
    }
}
