//! Shared utilities for streaming SSE response parsing.
//!
//! This module provides common helpers used by multiple LLM providers
//! for handling Server-Sent Events (SSE) streaming responses.

use crate::{CompletionChunk, ToolCall, Usage};

// ─────────────────────────────────────────────────────────────────────────────
// UTF-8 Streaming
// ─────────────────────────────────────────────────────────────────────────────

/// Try to decode bytes as UTF-8, handling incomplete sequences at the end.
/// Returns the decoded string and leaves any incomplete bytes in the buffer.
pub fn decode_utf8_streaming(byte_buffer: &mut Vec<u8>) -> Option<String> {
    match std::str::from_utf8(byte_buffer) {
        Ok(s) => {
            let result = s.to_string();
            byte_buffer.clear();
            Some(result)
        }
        Err(e) => {
            let valid_up_to = e.valid_up_to();
            if valid_up_to > 0 {
                let valid_bytes: Vec<u8> = byte_buffer.drain(..valid_up_to).collect();
                String::from_utf8(valid_bytes).ok()
            } else {
                None // No valid UTF-8 yet, wait for more bytes
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE line framing
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates raw SSE bytes and yields the payload of each complete
/// `data:` line.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    bytes: Vec<u8>,
    text: String,
}

impl SseLineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if let Some(decoded) = decode_utf8_streaming(&mut self.bytes) {
            self.text.push_str(&decoded);
        }
    }

    /// Pop the next complete `data:` payload, skipping comments and other fields.
    pub(crate) fn next_data(&mut self) -> Option<String> {
        while let Some(line_end) = self.text.find('\n') {
            let line = self.text[..line_end].trim().to_string();
            self.text.drain(..line_end + 1);

            if let Some(data) = line.strip_prefix("data:") {
                return Some(data.trim_start().to_string());
            }
        }
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion Chunk Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Create a final completion chunk with tool calls and usage.
pub fn make_final_chunk(
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
) -> CompletionChunk {
    CompletionChunk {
        content: String::new(),
        finished: true,
        usage,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        stop_reason,
        tool_call_streaming: None,
    }
}

/// Create a text content chunk (not finished).
pub fn make_text_chunk(content: String) -> CompletionChunk {
    CompletionChunk {
        content,
        finished: false,
        usage: None,
        tool_calls: None,
        stop_reason: None,
        tool_call_streaming: None,
    }
}

/// Create a chunk announcing that a tool call has started streaming.
pub(crate) fn make_tool_hint_chunk(tool_name: &str) -> CompletionChunk {
    CompletionChunk {
        content: String::new(),
        finished: false,
        usage: None,
        tool_calls: None,
        stop_reason: None,
        tool_call_streaming: Some(tool_name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_keeps_partial_sequence() {
        // "é" is 0xC3 0xA9; feed only the first byte after ASCII
        let mut buf = vec![b'a', b'b', 0xC3];
        assert_eq!(decode_utf8_streaming(&mut buf), Some("ab".to_string()));
        assert_eq!(buf, vec![0xC3]);

        buf.push(0xA9);
        assert_eq!(decode_utf8_streaming(&mut buf), Some("é".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_sse_buffer_splits_data_lines() {
        let mut sse = SseLineBuffer::default();
        sse.push(b"event: ping\ndata: {\"a\":1}\n\ndata: [DO");
        assert_eq!(sse.next_data().as_deref(), Some("{\"a\":1}"));
        assert_eq!(sse.next_data(), None);

        sse.push(b"NE]\n");
        assert_eq!(sse.next_data().as_deref(), Some("[DONE]"));
    }

    #[test]
    fn test_final_chunk_omits_empty_tool_calls() {
        let chunk = make_final_chunk(Vec::new(), None, Some("end_turn".to_string()));
        assert!(chunk.finished);
        assert!(chunk.tool_calls.is_none());
        assert_eq!(chunk.stop_reason.as_deref(), Some("end_turn"));
    }
}
