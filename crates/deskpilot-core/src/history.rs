//! Run history: one JSON line per finished run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One tool invocation, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub tool: String,
    pub args: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub target_app: Option<String>,
    pub response: String,
    pub tools_used: Vec<String>,
    pub actions: Vec<ActionLogEntry>,
    pub cancelled: bool,
}

pub trait HistoryStore: Send + Sync {
    fn append(&self, record: &RunRecord) -> Result<()>;

    /// Up to `limit` records, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<RunRecord>>;
}

/// Append-only JSONL file.
pub struct JsonlHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn append(&self, record: &RunRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open history file {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read history file {}", self.path.display()))?;

        Ok(content
            .lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<RunRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed history entry: {}", e);
                    None
                }
            })
            .take(limit)
            .collect())
    }
}

/// Keeps records in memory. Used when no history file is configured and in tests.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    records: Mutex<Vec<RunRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(&self, record: &RunRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(query: &str) -> RunRecord {
        RunRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            query: query.to_string(),
            target_app: Some("Notes".to_string()),
            response: "done".to_string(),
            tools_used: vec!["click".to_string()],
            actions: vec![ActionLogEntry {
                tool: "click".to_string(),
                args: serde_json::json!({"x": 10, "y": 20}),
                timestamp: Utc::now(),
            }],
            cancelled: false,
        }
    }

    #[test]
    fn test_jsonl_append_and_recent() {
        let dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("nested").join("history.jsonl"));
        assert!(store.recent(10).unwrap().is_empty());

        store.append(&record("first")).unwrap();
        store.append(&record("second")).unwrap();
        store.append(&record("third")).unwrap();

        let recent = store.recent(2).unwrap();
        let queries: Vec<&str> = recent.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, vec!["third", "second"]);
        assert_eq!(recent[0].actions[0].tool, "click");
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryHistoryStore::new();
        store.append(&record("only")).unwrap();
        assert_eq!(store.recent(5).unwrap().len(), 1);
    }
}
