//! Long-term memory: durable facts about the user, stored as JSONL.
//!
//! Facts come from the `remember` tool and from background flushes, where the
//! model is asked to pull durable facts out of the conversation so they survive
//! context eviction. Relevant facts are appended to the system prompt.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use deskpilot_providers::{CompletionRequest, LLMProvider, Message, MessageRole};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error_handling::truncate_for_logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Tool,
    Flush,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub fact: String,
    pub source: MemorySource,
    pub created_at: DateTime<Utc>,
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "you", "your", "user",
    "what", "how", "can", "please", "into", "about", "have", "has",
];

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn normalize(fact: &str) -> String {
    fact.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .to_lowercase()
}

/// File-backed fact store. Writes are serialized within the process.
pub struct MemoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored fact, oldest first. A missing file is an empty store;
    /// unreadable lines are skipped.
    pub fn all(&self) -> Result<Vec<MemoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read memory file {}", self.path.display()))?;

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping malformed memory entry: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Store `fact` unless an equivalent one exists. Returns whether it was added.
    pub fn add(&self, fact: &str, source: MemorySource) -> Result<bool> {
        let fact = fact.trim();
        if fact.is_empty() {
            return Ok(false);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let normalized = normalize(fact);
        if self.all()?.iter().any(|e| normalize(&e.fact) == normalized) {
            debug!("Memory already holds: {}", fact);
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            fact: fact.to_string(),
            source,
            created_at: Utc::now(),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open memory file {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(true)
    }

    /// Facts sharing the most keywords with `query`, best first. Ties keep
    /// the newer fact first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let query_words = keywords(query);
        if query_words.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, MemoryEntry)> = self
            .all()?
            .into_iter()
            .rev()
            .filter_map(|entry| {
                let score = keywords(&entry.fact).intersection(&query_words).count();
                (score > 0).then_some((score, entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }
}

/// Bulleted list of facts for the system prompt.
pub fn format_memories(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("- {}", e.fact))
        .collect::<Vec<_>>()
        .join("\n")
}

const FLUSH_PROMPT: &str = "Extract durable facts about the user from the conversation below: \
preferences, names, accounts, recurring tasks. Ignore one-off details of the current task. \
Answer with one fact per line, each starting with \"- \". Answer NONE if there are no such facts.";

const MAX_TRANSCRIPT_CHARS: usize = 24_000;

/// Asks the model to distil conversation messages into memory facts.
pub struct MemoryFlusher {
    provider: Arc<dyn LLMProvider>,
    store: Arc<MemoryStore>,
}

impl MemoryFlusher {
    pub fn new(provider: Arc<dyn LLMProvider>, store: Arc<MemoryStore>) -> Self {
        Self { provider, store }
    }

    /// Returns the number of new facts stored.
    pub async fn flush(&self, messages: &[Message]) -> Result<usize> {
        let transcript = transcript(messages);
        if transcript.is_empty() {
            return Ok(0);
        }

        let request = CompletionRequest {
            messages: vec![
                Message::new(MessageRole::System, FLUSH_PROMPT.to_string()),
                Message::new(MessageRole::User, transcript),
            ],
            max_tokens: Some(1024),
            temperature: Some(0.0),
            stream: false,
            tools: None,
        };
        let response = self
            .provider
            .complete(request)
            .await
            .context("Memory flush request failed")?;

        let mut added = 0;
        for fact in parse_facts(&response.content) {
            if self.store.add(&fact, MemorySource::Flush)? {
                added += 1;
            }
        }
        debug!("Memory flush stored {} new fact(s)", added);
        Ok(added)
    }
}

/// User and assistant text, newest kept when the transcript is too long.
fn transcript(messages: &[Message]) -> String {
    let lines: Vec<String> = messages
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            let speaker = if m.role == MessageRole::User { "User" } else { "Assistant" };
            format!("{}: {}", speaker, truncate_for_logging(m.content.trim(), 4000))
        })
        .collect();

    let mut total = 0;
    let mut kept: Vec<&String> = lines
        .iter()
        .rev()
        .take_while(|line| {
            total += line.len();
            total <= MAX_TRANSCRIPT_CHARS
        })
        .collect();
    kept.reverse();
    kept.into_iter().cloned().collect::<Vec<_>>().join("\n\n")
}

fn parse_facts(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")))
        .map(str::trim)
        .filter(|fact| !fact.is_empty())
        .map(str::to_string)
        .collect()
}
