//! Per-run user settings written by the front end.
//!
//! Read once at the start of every run, so changes apply to the next run
//! without restarting.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use deskpilot_config::ToolsConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSetting {
    pub enabled: bool,
    pub auto_approve: bool,
}

impl Default for ToolSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Provider to use, as "<type>.<name>"; the configured default otherwise
    pub provider: Option<String>,
    pub tools: HashMap<String, ToolSetting>,
}

impl RunSettings {
    /// Tool names to hide, config entries first.
    pub fn disabled_tools(&self, config: &ToolsConfig) -> Vec<String> {
        let mut disabled = config.disabled.clone();
        let mut from_settings: Vec<&String> = self
            .tools
            .iter()
            .filter(|(_, s)| !s.enabled)
            .map(|(name, _)| name)
            .collect();
        from_settings.sort();
        for name in from_settings {
            if !disabled.contains(name) {
                disabled.push(name.clone());
            }
        }
        disabled
    }

    /// Tool names that skip approval. A tool the settings explicitly mark
    /// as not auto-approved loses a config entry.
    pub fn auto_approved_tools(&self, config: &ToolsConfig) -> Vec<String> {
        let mut approved: Vec<String> = config
            .auto_approve
            .iter()
            .filter(|name| self.tools.get(*name).map_or(true, |s| s.auto_approve))
            .cloned()
            .collect();
        let mut from_settings: Vec<&String> = self
            .tools
            .iter()
            .filter(|(_, s)| s.auto_approve)
            .map(|(name, _)| name)
            .collect();
        from_settings.sort();
        for name in from_settings {
            if !approved.contains(name) {
                approved.push(name.clone());
            }
        }
        approved
    }
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<RunSettings>;
}

/// JSON settings file; a missing file means defaults.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn save(&self, settings: &RunSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(settings)?)
            .with_context(|| format!("Failed to write settings {}", self.path.display()))
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<RunSettings> {
        if !self.path.exists() {
            return Ok(RunSettings::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", self.path.display()))
    }
}

/// Fixed settings, for front ends that pass everything on the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsStore(pub RunSettings);

impl SettingsStore for StaticSettingsStore {
    fn load(&self) -> Result<RunSettings> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().unwrap(), RunSettings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("a").join("settings.json"));
        let mut settings = RunSettings {
            provider: Some("gemini.default".to_string()),
            ..RunSettings::default()
        };
        settings.tools.insert(
            "run_script".to_string(),
            ToolSetting {
                enabled: false,
                auto_approve: false,
            },
        );
        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn test_partial_tool_setting_uses_defaults() {
        let settings: RunSettings =
            serde_json::from_str(r#"{"tools": {"click": {"auto_approve": true}}}"#).unwrap();
        assert_eq!(
            settings.tools["click"],
            ToolSetting {
                enabled: true,
                auto_approve: true
            }
        );
    }

    #[test]
    fn test_merge_with_config() {
        let config = ToolsConfig {
            disabled: vec!["insert_image".to_string()],
            auto_approve: vec!["scroll".to_string(), "click".to_string()],
            integration_safe: Vec::new(),
            ..Default::default()
        };
        let mut settings = RunSettings::default();
        settings.tools.insert(
            "run_script".to_string(),
            ToolSetting {
                enabled: false,
                auto_approve: false,
            },
        );
        settings.tools.insert(
            "click".to_string(),
            ToolSetting {
                enabled: true,
                auto_approve: false,
            },
        );
        settings.tools.insert(
            "type_text".to_string(),
            ToolSetting {
                enabled: true,
                auto_approve: true,
            },
        );

        assert_eq!(settings.disabled_tools(&config), vec!["insert_image", "run_script"]);
        assert_eq!(settings.auto_approved_tools(&config), vec!["scroll", "type_text"]);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(FileSettingsStore::new(path).load().is_err());
    }
}
