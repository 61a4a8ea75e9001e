//! Google Gemini provider.
//!
//! Implements `LLMProvider` over the Gemini `generateContent` and
//! `streamGenerateContent` endpoints, with native function calling and
//! inline screenshots.
//!
//! Gemini models report pointer positions on a normalized 0..999 grid over
//! the screen rather than in pixels, so this provider advertises
//! [`CoordinateConvention::NormalizedGrid`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use deskpilot_providers::{GeminiProvider, LLMProvider, CompletionRequest, Message, MessageRole};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = GeminiProvider::new(
//!         "your-api-key".to_string(),
//!         Some("gemini-2.5-flash".to_string()),
//!         Some(8192),
//!         Some(0.2),
//!     )?;
//!
//!     let request = CompletionRequest {
//!         messages: vec![
//!             Message::new(MessageRole::System, "You operate a desktop.".to_string()),
//!             Message::new(MessageRole::User, "What app is focused?".to_string()),
//!         ],
//!         max_tokens: Some(1000),
//!         temperature: None,
//!         stream: false,
//!         tools: None,
//!     };
//!
//!     let response = provider.complete(request).await?;
//!     println!("Response: {}", response.content);
//!
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::streaming::{make_tool_hint_chunk, SseLineBuffer};
use crate::{
    make_final_chunk, make_text_chunk, CompletionChunk, CompletionRequest, CompletionResponse,
    CompletionStream, CoordinateConvention, LLMProvider, Message, MessageRole, Tool, ToolCall,
    Usage,
};

// ============================================================================
// Provider Struct
// ============================================================================

#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    name: String,
}

impl GeminiProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        Self::new_with_name("gemini".to_string(), api_key, model, max_tokens, temperature)
    }

    pub fn new_with_name(
        name: String,
        api_key: String,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key,
            model: model.unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            max_tokens: max_tokens.unwrap_or(16384),
            temperature: temperature.unwrap_or(0.1),
            name,
        })
    }

    fn get_api_url(&self, stream: bool) -> String {
        if stream {
            format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.model
            )
        } else {
            format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                self.model
            )
        }
    }
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

/// Gemini API request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

/// Gemini API response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

// ============================================================================
// Message Conversion
// ============================================================================

fn image_parts(msg: &Message) -> impl Iterator<Item = GeminiPart> + '_ {
    msg.images.iter().map(|image| GeminiPart::InlineData {
        inline_data: GeminiBlob {
            mime_type: image.media_type.clone(),
            data: image.data.clone(),
        },
    })
}

/// Convert messages to Gemini format.
///
/// System messages go to `system_instruction`, assistant turns use the
/// "model" role, and tool results become `functionResponse` parts. Gemini
/// keys function responses by name, so call ids are resolved through the
/// preceding assistant turns.
fn convert_messages(messages: &[Message]) -> (Vec<GeminiContent>, Option<GeminiContent>) {
    let mut contents: Vec<GeminiContent> = Vec::new();
    let mut system_instruction = None;
    let mut call_names: HashMap<&str, &str> = HashMap::new();

    for msg in messages {
        match msg.role {
            MessageRole::System => {
                system_instruction = Some(GeminiContent {
                    role: None,
                    parts: vec![GeminiPart::Text {
                        text: msg.content.clone(),
                    }],
                });
            }
            MessageRole::User => {
                let mut parts = vec![GeminiPart::Text {
                    text: msg.content.clone(),
                }];
                parts.extend(image_parts(msg));
                contents.push(GeminiContent {
                    role: Some("user".to_string()),
                    parts,
                });
            }
            MessageRole::Assistant => {
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(GeminiPart::Text {
                        text: msg.content.clone(),
                    });
                }
                for call in &msg.tool_calls {
                    call_names.insert(call.id.as_str(), call.tool.as_str());
                    parts.push(GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: call.tool.clone(),
                            args: call.args.clone(),
                        },
                    });
                }
                if parts.is_empty() {
                    continue;
                }
                contents.push(GeminiContent {
                    role: Some("model".to_string()),
                    parts,
                });
            }
            MessageRole::Tool => {
                let name = msg
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| call_names.get(id).copied())
                    .unwrap_or("tool");
                let mut parts = vec![GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: name.to_string(),
                        response: serde_json::json!({ "result": msg.content }),
                    },
                }];
                parts.extend(image_parts(msg));

                // Consecutive tool results share one user turn.
                match contents.last_mut() {
                    Some(last)
                        if last.role.as_deref() == Some("user")
                            && last
                                .parts
                                .iter()
                                .any(|p| matches!(p, GeminiPart::FunctionResponse { .. })) =>
                    {
                        last.parts.extend(parts);
                    }
                    _ => contents.push(GeminiContent {
                        role: Some("user".to_string()),
                        parts,
                    }),
                }
            }
        }
    }

    (contents, system_instruction)
}

fn convert_tools(tools: &[Tool]) -> Vec<GeminiTool> {
    let declarations: Vec<GeminiFunctionDeclaration> = tools
        .iter()
        .map(|tool| GeminiFunctionDeclaration {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: if tool.input_schema.is_null() {
                None
            } else {
                Some(tool.input_schema.clone())
            },
        })
        .collect();

    vec![GeminiTool {
        function_declarations: declarations,
    }]
}

fn extract_text_from_parts(parts: &[GeminiPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            GeminiPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Gemini does not assign call ids, so one is minted per call.
fn extract_tool_calls_from_parts(parts: &[GeminiPart]) -> Vec<ToolCall> {
    parts
        .iter()
        .filter_map(|part| match part {
            GeminiPart::FunctionCall { function_call } => Some(ToolCall {
                id: format!("call_{}", nanoid::nanoid!(8)),
                tool: function_call.name.clone(),
                args: function_call.args.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn convert_usage(metadata: Option<&GeminiUsageMetadata>) -> Usage {
    match metadata {
        Some(m) => Usage {
            prompt_tokens: m.prompt_token_count.unwrap_or(0),
            completion_tokens: m.candidates_token_count.unwrap_or(0),
            total_tokens: m.total_token_count.unwrap_or(0),
        },
        None => Usage::default(),
    }
}

fn convert_finish_reason(reason: Option<&str>) -> Option<String> {
    reason.map(|r| match r {
        "STOP" => "end_turn".to_string(),
        "MAX_TOKENS" => "max_tokens".to_string(),
        "SAFETY" | "RECITATION" => "content_filter".to_string(),
        other => other.to_lowercase(),
    })
}

// ============================================================================
// Streaming Parser
// ============================================================================

/// The useful content of one streamed `GenerateContentResponse`.
#[derive(Debug)]
struct StreamedPiece {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
    usage: Option<GeminiUsageMetadata>,
}

fn parse_streaming_chunk(data: &str) -> Option<StreamedPiece> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }

    let response: GeminiResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            debug!("Failed to parse Gemini streaming chunk: {} - data: {}", e, data);
            return None;
        }
    };

    let candidate = response.candidates.as_ref().and_then(|c| c.first());
    let parts = candidate
        .and_then(|c| c.content.as_ref())
        .map(|c| c.parts.as_slice())
        .unwrap_or(&[]);

    Some(StreamedPiece {
        text: extract_text_from_parts(parts),
        tool_calls: extract_tool_calls_from_parts(parts),
        finish_reason: convert_finish_reason(candidate.and_then(|c| c.finish_reason.as_deref())),
        usage: response.usage_metadata,
    })
}

async fn process_stream(mut response: reqwest::Response, tx: mpsc::Sender<Result<CompletionChunk>>) {
    let mut sse = SseLineBuffer::default();
    let mut last_usage: Option<GeminiUsageMetadata> = None;
    let mut last_finish_reason: Option<String> = None;
    let mut pending_tool_calls: Vec<ToolCall> = Vec::new();

    while let Some(chunk_result) = response.chunk().await.transpose() {
        match chunk_result {
            Ok(bytes) => {
                sse.push(&bytes);
                while let Some(data) = sse.next_data() {
                    let Some(piece) = parse_streaming_chunk(&data) else {
                        continue;
                    };
                    if piece.usage.is_some() {
                        last_usage = piece.usage;
                    }
                    if piece.finish_reason.is_some() {
                        last_finish_reason = piece.finish_reason;
                    }
                    for call in &piece.tool_calls {
                        if tx.send(Ok(make_tool_hint_chunk(&call.tool))).await.is_err() {
                            return;
                        }
                    }
                    pending_tool_calls.extend(piece.tool_calls);

                    if !piece.text.is_empty() && tx.send(Ok(make_text_chunk(piece.text))).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Error reading Gemini stream: {}", e);
                let _ = tx.send(Err(anyhow::anyhow!("Stream error: {}", e))).await;
                return;
            }
        }
    }

    if !pending_tool_calls.is_empty() {
        last_finish_reason = Some("tool_use".to_string());
    }
    let final_chunk = make_final_chunk(
        pending_tool_calls,
        Some(convert_usage(last_usage.as_ref())),
        last_finish_reason,
    );
    let _ = tx.send(Ok(final_chunk)).await;
}

// ============================================================================
// LLMProvider Implementation
// ============================================================================

impl GeminiProvider {
    fn build_request(&self, request: &CompletionRequest) -> GeminiRequest {
        let (contents, system_instruction) = convert_messages(&request.messages);
        GeminiRequest {
            contents,
            system_instruction,
            tools: request
                .tools
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|t| convert_tools(t)),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.max_tokens.or(Some(self.max_tokens)),
                temperature: request.temperature.or(Some(self.temperature)),
            },
        }
    }

    async fn post(&self, url: &str, body: &GeminiRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error ({}): {}", status, error_text);
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let gemini_request = self.build_request(&request);
        let url = self.get_api_url(false);
        debug!("Gemini request URL: {}", url);

        let gemini_response: GeminiResponse = self.post(&url, &gemini_request).await?.json().await?;

        let content = gemini_response
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.content.as_ref())
            .map(|c| extract_text_from_parts(&c.parts))
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            usage: convert_usage(gemini_response.usage_metadata.as_ref()),
            model: self.model.clone(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let gemini_request = self.build_request(&request);
        let url = self.get_api_url(true);
        debug!("Gemini streaming request URL: {}", url);

        let response = self.post(&url, &gemini_request).await?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(process_stream(response, tx));

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
        // https://ai.google.dev/gemini-api/docs/models
        let size = if self.model.contains("1.5-pro") {
            2_000_000
        } else if self.model.contains("2.5") || self.model.contains("2.0") || self.model.contains("1.5-flash") {
            1_000_000
        } else {
            128_000
        };
        Some(size)
    }

    fn coordinate_convention(&self) -> CoordinateConvention {
        CoordinateConvention::NormalizedGrid
    }

    fn validate_credentials(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("No API key configured for provider '{}'", self.name);
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageContent;
    use serde_json::json;

    #[test]
    fn test_convert_messages_basic() {
        let messages = vec![
            Message::new(MessageRole::User, "Hello".to_string()),
            Message::new(MessageRole::Assistant, "Hi there!".to_string()),
        ];

        let (contents, system) = convert_messages(&messages);

        assert!(system.is_none());
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role, Some("user".to_string()));
        assert_eq!(contents[1].role, Some("model".to_string()));
    }

    #[test]
    fn test_convert_messages_with_system() {
        let messages = vec![
            Message::new(MessageRole::System, "You are helpful.".to_string()),
            Message::new(MessageRole::User, "Hello".to_string()),
        ];

        let (contents, system) = convert_messages(&messages);

        let sys = system.unwrap();
        assert!(sys.role.is_none());
        assert_eq!(contents.len(), 1);
    }

    #[test]
    fn test_tool_results_resolve_function_names() {
        let calls = vec![
            ToolCall {
                id: "c1".to_string(),
                tool: "click".to_string(),
                args: json!({"x": 500, "y": 500}),
            },
            ToolCall {
                id: "c2".to_string(),
                tool: "screenshot".to_string(),
                args: json!({}),
            },
        ];
        let messages = vec![
            Message::new(MessageRole::User, "press the button".to_string()),
            Message::assistant_with_tool_calls(String::new(), calls),
            Message::tool_result("c1", "clicked".to_string(), Vec::new()),
            Message::tool_result(
                "c2",
                "captured".to_string(),
                vec![ImageContent::new("image/jpeg", "AAAA".to_string())],
            ),
        ];

        let (contents, _) = convert_messages(&messages);
        assert_eq!(contents.len(), 3, "both tool results share one user turn");

        let results = &contents[2].parts;
        let names: Vec<&str> = results
            .iter()
            .filter_map(|p| match p {
                GeminiPart::FunctionResponse { function_response } => {
                    Some(function_response.name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["click", "screenshot"]);
        assert!(results
            .iter()
            .any(|p| matches!(p, GeminiPart::InlineData { .. })));
    }

    #[test]
    fn test_convert_tools() {
        let tools = vec![Tool {
            name: "click".to_string(),
            description: "Click at a point".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "x": { "type": "number" } }
            }),
        }];

        let gemini_tools = convert_tools(&tools);
        assert_eq!(gemini_tools[0].function_declarations.len(), 1);
        assert_eq!(gemini_tools[0].function_declarations[0].name, "click");
    }

    #[test]
    fn test_parse_streaming_chunk() {
        let chunk = r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":10,"candidatesTokenCount":5,"totalTokenCount":15}}"#;

        let piece = parse_streaming_chunk(chunk).unwrap();
        assert_eq!(piece.text, "Hello");
        assert!(piece.tool_calls.is_empty());
        assert_eq!(piece.finish_reason, Some("end_turn".to_string()));
        assert_eq!(piece.usage.unwrap().total_token_count, Some(15));
    }

    #[test]
    fn test_parse_streaming_chunk_with_tool_call() {
        let chunk = r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"click","args":{"x":500,"y":500}}}],"role":"model"}}]}"#;

        let piece = parse_streaming_chunk(chunk).unwrap();
        assert_eq!(piece.text, "");
        assert_eq!(piece.tool_calls.len(), 1);
        assert_eq!(piece.tool_calls[0].tool, "click");
        assert!(piece.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_convert_finish_reason() {
        assert_eq!(convert_finish_reason(Some("STOP")), Some("end_turn".to_string()));
        assert_eq!(convert_finish_reason(Some("MAX_TOKENS")), Some("max_tokens".to_string()));
        assert_eq!(convert_finish_reason(Some("SAFETY")), Some("content_filter".to_string()));
        assert_eq!(convert_finish_reason(None), None);
    }

    #[test]
    fn test_provider_reports_normalized_grid() {
        let provider = GeminiProvider::new("key".to_string(), None, None, None).unwrap();
        assert_eq!(provider.coordinate_convention(), CoordinateConvention::NormalizedGrid);
        assert!(provider.validate_credentials().is_ok());

        let missing = GeminiProvider::new(String::new(), None, None, None).unwrap();
        assert!(missing.validate_credentials().is_err());
    }
}
