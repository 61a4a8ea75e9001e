//! Context window management for conversation history and token tracking.
//!
//! This module handles:
//! - Token estimation through a pluggable [`TokenEstimator`]
//! - FIFO eviction that keeps the system message and stays within budget
//! - The hysteresis policy that decides when to flush memory

use deskpilot_providers::{Message, MessageRole};
use tracing::debug;

/// Estimates the token cost of a message.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, message: &Message) -> u32;
}

/// Length heuristic: ~4 chars per token for prose, ~3 for code or JSON, plus
/// a 10% buffer and a flat charge per image. This is an approximation, not a
/// tokenizer; budgets should leave headroom for the error.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    pub image_tokens: u32,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self { image_tokens: 1600 }
    }
}

impl CharRatioEstimator {
    pub fn estimate_text(text: &str) -> u32 {
        let base_estimate = if text.contains('{') || text.contains("```") {
            (text.len() as f32 / 3.0).ceil() as u32
        } else {
            (text.len() as f32 / 4.0).ceil() as u32
        };
        (base_estimate as f32 * 1.1).ceil() as u32
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, message: &Message) -> u32 {
        let mut tokens = Self::estimate_text(&message.content);
        for call in &message.tool_calls {
            tokens += Self::estimate_text(&call.tool) + Self::estimate_text(&call.args.to_string());
        }
        tokens + self.image_tokens * message.images.len() as u32
    }
}

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    tokens: u32,
}

/// Ordered, token-budgeted conversation. The first message, when it is a
/// system message, is never evicted.
pub struct ContextWindow {
    entries: Vec<Entry>,
    used_tokens: u32,
    max_tokens: u32,
    estimator: Box<dyn TokenEstimator>,
}

impl ContextWindow {
    pub fn new(max_tokens: u32) -> Self {
        Self::with_estimator(max_tokens, Box::new(CharRatioEstimator::default()))
    }

    pub fn with_estimator(max_tokens: u32, estimator: Box<dyn TokenEstimator>) -> Self {
        Self {
            entries: Vec::new(),
            used_tokens: 0,
            max_tokens,
            estimator,
        }
    }

    /// Append `message`, evicting the oldest non-system messages until it
    /// fits. Returns the number of messages evicted.
    pub fn track(&mut self, message: Message) -> usize {
        let tokens = self.estimator.estimate(&message);
        self.track_with_tokens(message, tokens)
    }

    /// Like [`track`](Self::track) with an explicit cost.
    pub fn track_with_tokens(&mut self, message: Message, tokens: u32) -> usize {
        let keep = self.call_group(message.tool_call_id.as_deref());
        let mut evicted = 0;
        while self.used_tokens + tokens > self.max_tokens && self.entries.len() > 1 {
            match self.evict_oldest(&keep) {
                0 => break,
                n => evicted += n,
            }
        }

        self.used_tokens += tokens;
        self.entries.push(Entry { message, tokens });

        debug!(
            "Tracked message with {} tokens (used: {}/{}, evicted: {})",
            tokens, self.used_tokens, self.max_tokens, evicted
        );
        evicted
    }

    /// Ids of every call issued alongside `tool_call_id`. The assistant
    /// message and its results must stay while one of those results is
    /// being added.
    fn call_group(&self, tool_call_id: Option<&str>) -> Vec<String> {
        let Some(id) = tool_call_id else {
            return Vec::new();
        };
        self.entries
            .iter()
            .rev()
            .find(|e| e.message.tool_calls.iter().any(|c| c.id == id))
            .map(|e| e.message.tool_calls.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove the oldest evictable message. An assistant message that issued
    /// tool calls takes the tool results answering it along, so no result is
    /// left without its call. Messages of the `keep` call group are skipped.
    fn evict_oldest(&mut self, keep: &[String]) -> usize {
        let kept = |e: &Entry| {
            e.message.tool_calls.iter().any(|c| keep.contains(&c.id))
                || e.message
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| keep.contains(id))
        };
        let Some(index) = self
            .entries
            .iter()
            .enumerate()
            .position(|(i, e)| !(i == 0 && e.message.role == MessageRole::System) && !kept(e))
        else {
            return 0;
        };

        let removed = self.entries.remove(index);
        self.used_tokens -= removed.tokens;
        let mut count = 1;

        let call_ids: Vec<String> = removed.message.tool_calls.iter().map(|c| c.id.clone()).collect();
        let orphan = |e: &Entry| {
            e.message.role == MessageRole::Tool
                && e.message
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| call_ids.contains(id))
        };
        while index < self.entries.len() && orphan(&self.entries[index]) {
            let result = self.entries.remove(index);
            self.used_tokens -= result.tokens;
            count += 1;
        }

        debug!("Evicted {} message(s) ({} tokens remain)", count, self.used_tokens);
        count
    }

    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_tokens(&self) -> u32 {
        self.used_tokens
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn usage_percent(&self) -> f32 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.used_tokens as f32 / self.max_tokens as f32) * 100.0
    }
}

/// Decides when conversation facts should be flushed to memory: first once
/// usage reaches the threshold, then only after the context has grown by
/// `growth_percent` over the size at the previous flush.
#[derive(Debug, Clone)]
pub struct MemoryFlushPolicy {
    threshold_percent: f32,
    growth_percent: f32,
    tokens_at_last_flush: Option<u32>,
}

impl Default for MemoryFlushPolicy {
    fn default() -> Self {
        Self::new(60.0, 30.0)
    }
}

impl MemoryFlushPolicy {
    pub fn new(threshold_percent: f32, growth_percent: f32) -> Self {
        Self {
            threshold_percent,
            growth_percent,
            tokens_at_last_flush: None,
        }
    }

    pub fn should_flush(&self, window: &ContextWindow) -> bool {
        if window.usage_percent() < self.threshold_percent {
            return false;
        }
        match self.tokens_at_last_flush {
            None => true,
            Some(last) => {
                window.current_tokens() as f32 >= last as f32 * (1.0 + self.growth_percent / 100.0)
            }
        }
    }

    pub fn record_flush(&mut self, window: &ContextWindow) {
        self.tokens_at_last_flush = Some(window.current_tokens());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_providers::{ImageContent, ToolCall};

    fn msg(role: MessageRole, text: &str) -> Message {
        Message::new(role, text.to_string())
    }

    #[test]
    fn test_fourth_message_evicts_oldest_only() {
        let mut window = ContextWindow::new(1000);
        window.track_with_tokens(msg(MessageRole::System, "system"), 100);
        window.track_with_tokens(msg(MessageRole::User, "first"), 400);
        window.track_with_tokens(msg(MessageRole::Assistant, "second"), 400);
        assert_eq!(window.current_tokens(), 900);

        let evicted = window.track_with_tokens(msg(MessageRole::User, "third"), 400);

        assert_eq!(evicted, 1);
        assert_eq!(window.current_tokens(), 900);
        assert!(window.current_tokens() <= window.max_tokens());
        let contents: Vec<String> = window.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["system", "second", "third"]);
    }

    #[test]
    fn test_system_message_survives_oversized_message() {
        let mut window = ContextWindow::new(100);
        window.track_with_tokens(msg(MessageRole::System, "system"), 50);
        window.track_with_tokens(msg(MessageRole::User, "a"), 40);
        window.track_with_tokens(msg(MessageRole::User, "huge"), 500);

        let messages = window.messages();
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages.len(), 2);
        assert_eq!(window.current_tokens(), 550);
    }

    #[test]
    fn test_eviction_takes_answering_tool_results() {
        let call = ToolCall {
            id: "call_1".to_string(),
            tool: "click".to_string(),
            args: serde_json::json!({"x": 1, "y": 2}),
        };
        let mut window = ContextWindow::new(300);
        window.track_with_tokens(msg(MessageRole::System, "system"), 100);
        window.track_with_tokens(Message::assistant_with_tool_calls(String::new(), vec![call]), 50);
        window.track_with_tokens(Message::tool_result("call_1", "ok".to_string(), Vec::new()), 50);
        window.track_with_tokens(msg(MessageRole::User, "next"), 50);

        let evicted = window.track_with_tokens(msg(MessageRole::User, "big"), 100);

        assert_eq!(evicted, 2);
        assert_eq!(window.current_tokens(), 250);
        assert!(window.messages().iter().all(|m| m.role != MessageRole::Tool));
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            tool: "press_key".to_string(),
            args: serde_json::json!({"keys": "tab"}),
        }
    }

    #[test]
    fn test_result_never_evicts_its_own_call() {
        let mut window = ContextWindow::new(1000);
        window.track_with_tokens(msg(MessageRole::System, "system"), 100);
        window.track_with_tokens(
            Message::assistant_with_tool_calls(String::new(), vec![call("call_a"), call("call_b")]),
            200,
        );
        window.track_with_tokens(Message::tool_result("call_a", "a".to_string(), Vec::new()), 100);
        window.track_with_tokens(msg(MessageRole::User, "note"), 300);

        let evicted =
            window.track_with_tokens(Message::tool_result("call_b", "b".to_string(), Vec::new()), 400);

        assert_eq!(evicted, 1);
        assert_eq!(window.current_tokens(), 800);
        let messages = window.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].tool_calls.len(), 2);
        let answered: Vec<Option<String>> =
            messages[2..].iter().map(|m| m.tool_call_id.clone()).collect();
        assert_eq!(
            answered,
            vec![Some("call_a".to_string()), Some("call_b".to_string())]
        );
    }

    #[test]
    fn test_open_call_group_stays_even_over_budget() {
        let mut window = ContextWindow::new(1000);
        window.track_with_tokens(msg(MessageRole::System, "system"), 100);
        window.track_with_tokens(
            Message::assistant_with_tool_calls(String::new(), vec![call("call_a"), call("call_b")]),
            400,
        );
        window.track_with_tokens(Message::tool_result("call_a", "a".to_string(), Vec::new()), 300);

        let evicted =
            window.track_with_tokens(Message::tool_result("call_b", "b".to_string(), Vec::new()), 300);

        assert_eq!(evicted, 0);
        assert_eq!(window.len(), 4);
        assert_eq!(window.current_tokens(), 1100);
    }

    #[test]
    fn test_estimator_charges_images_and_code() {
        let estimator = CharRatioEstimator::default();
        let prose = msg(MessageRole::User, &"word ".repeat(40));
        let json = msg(MessageRole::User, &format!("{{{}}}", "a".repeat(198)));
        assert!(estimator.estimate(&json) > estimator.estimate(&prose));

        let with_image = Message::with_images(
            MessageRole::User,
            String::new(),
            vec![ImageContent::new("image/jpeg", "AAAA".to_string())],
        );
        assert_eq!(estimator.estimate(&with_image), 1600);
    }

    #[test]
    fn test_flush_policy_hysteresis() {
        let mut window = ContextWindow::new(1000);
        let mut policy = MemoryFlushPolicy::default();

        window.track_with_tokens(msg(MessageRole::User, "a"), 590);
        assert!(!policy.should_flush(&window));

        window.track_with_tokens(msg(MessageRole::User, "b"), 10);
        assert!(policy.should_flush(&window));
        policy.record_flush(&window);
        assert!(!policy.should_flush(&window));

        // 600 * 1.3 = 780
        window.track_with_tokens(msg(MessageRole::User, "c"), 170);
        assert!(!policy.should_flush(&window));
        window.track_with_tokens(msg(MessageRole::User, "d"), 10);
        assert!(policy.should_flush(&window));
    }

    #[test]
    fn test_usage_percent() {
        let mut window = ContextWindow::new(200);
        window.track_with_tokens(msg(MessageRole::User, "x"), 50);
        assert_eq!(window.usage_percent(), 25.0);
        assert_eq!(ContextWindow::new(0).usage_percent(), 0.0);
    }
}
