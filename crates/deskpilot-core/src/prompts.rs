use crate::memory::{format_memories, MemoryEntry};
use crate::state_extractor::AppState;

const SYSTEM_PROMPT: &str =
"You are Deskpilot, a desktop copilot. You help the user by reading what is on their screen and operating their applications for them.

Each request comes with the current state of the application the user is working in. Depending on the application this is page content with interactive elements, document text from the app's scripting interface, a list of UI elements, or a screenshot. After every round of tool calls you receive a fresh state.

How to work:
1. Decide what the user wants. If the state already answers a question, answer it directly with final_answer.
2. Prefer precise tools: run_script for apps with a scripting dictionary, keyboard shortcuts over pointer clicks, run_actions for several steps in a row.
3. Use pointer tools with coordinates exactly as you read them from the screenshot or element list you were given.
4. After acting, check the new state before assuming an action worked. If something fails twice, try a different approach.
5. Some actions ask the user for approval. If an action is denied, do not retry it; explain what you would have done instead.
6. Use remember for durable facts about the user (names, preferences), never for details of the current task.
7. Finish every task with final_answer, summarising what you did in one or two sentences.

Never type passwords or payment details, and never send messages or delete data unless the user asked for exactly that.";

/// System prompt, followed by remembered facts relevant to this run.
pub fn system_prompt(memories: &[MemoryEntry]) -> String {
    let today = chrono::Local::now().format("%A, %B %-d, %Y");
    let mut prompt = format!("{}\n\nToday is {}.", SYSTEM_PROMPT, today);
    if !memories.is_empty() {
        prompt.push_str("\n\nWhat you know about the user:\n");
        prompt.push_str(&format_memories(memories));
    }
    prompt
}

/// First user message of a run: the request plus the extracted state.
pub fn user_prompt(query: &str, state: &AppState) -> String {
    format!(
        "{}\n\n<app_state method=\"{}\">\n{}\n</app_state>",
        query.trim(),
        state.method,
        state.formatted
    )
}

/// State refresh sent after a round of tool calls.
pub fn state_update(state: &AppState) -> String {
    format!(
        "<app_state method=\"{}\">\n{}\n</app_state>",
        state.method, state.formatted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySource;
    use chrono::Utc;

    fn state() -> AppState {
        AppState {
            tier: 2,
            method: "structured_scripting",
            app: Some("Notes".to_string()),
            formatted: "Application: Notes\nGroceries".to_string(),
            raw: None,
            screenshot: None,
            attempted_tiers: vec![2],
        }
    }

    #[test]
    fn test_system_prompt_lists_memories() {
        assert!(!system_prompt(&[]).contains("What you know"));

        let memories = vec![MemoryEntry {
            id: "1".to_string(),
            fact: "Prefers metric units".to_string(),
            source: MemorySource::Tool,
            created_at: Utc::now(),
        }];
        let prompt = system_prompt(&memories);
        assert!(prompt.contains("What you know about the user:\n- Prefers metric units"));
    }

    #[test]
    fn test_user_prompt_wraps_state() {
        let prompt = user_prompt("  add milk  ", &state());
        assert!(prompt.starts_with("add milk\n\n<app_state method=\"structured_scripting\">"));
        assert!(prompt.ends_with("Groceries\n</app_state>"));
        assert!(state_update(&state()).starts_with("<app_state"));
    }
}
