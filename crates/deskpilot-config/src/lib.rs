use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Locations searched, in order, when no explicit config path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "./deskpilot.toml",
    "~/.config/deskpilot/config.toml",
    "~/.deskpilot.toml",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub computer_control: ComputerControlConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Provider configuration with named configs per provider type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Default provider in format "<provider_type>.<config_name>"
    pub default_provider: String,

    #[serde(default)]
    pub anthropic: HashMap<String, AnthropicConfig>,

    #[serde(default)]
    pub openai: HashMap<String, OpenAIConfig>,

    #[serde(default)]
    pub gemini: HashMap<String, GeminiConfig>,

    /// OpenAI-compatible endpoints (local servers, routers, etc.)
    #[serde(default)]
    pub openai_compatible: HashMap<String, OpenAIConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub context_window: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Overrides the provider's reported context window
    pub max_context_length: Option<u32>,
    /// Budget used when neither the config nor the provider gives one
    pub fallback_context_length: u32,
    /// Provider round-trips allowed in one run
    pub max_iterations: u32,
    /// Context usage (percent) at which a memory flush first triggers
    pub memory_flush_threshold_percent: f32,
    /// Growth (percent) over the last flush needed before flushing again
    pub memory_flush_growth_percent: f32,
    /// Memory facts appended to the system prompt
    pub memory_search_limit: usize,
    pub max_retry_attempts: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_context_length: None,
            fallback_context_length: 128_000,
            max_iterations: 25,
            memory_flush_threshold_percent: 60.0,
            memory_flush_growth_percent: 30.0,
            memory_search_limit: 5,
            max_retry_attempts: 3,
        }
    }
}

/// Timeouts for host automation calls. Every call is hard-bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputerControlConfig {
    pub enabled: bool,
    pub action_timeout_ms: u64,
    pub script_timeout_ms: u64,
    pub screenshot_timeout_ms: u64,
    /// Longest edge of screenshots sent to vision models
    pub max_screenshot_edge: u32,
}

impl Default for ComputerControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action_timeout_ms: 5_000,
            script_timeout_ms: 20_000,
            screenshot_timeout_ms: 10_000,
            max_screenshot_edge: 1568,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Applications probed with an injected page script
    pub browsers: Vec<String>,
    /// Applications with a structured scripting dictionary
    pub scriptable_apps: Vec<String>,
    pub min_ax_elements: usize,
    pub min_ax_text_chars: usize,
    /// Formatted state is truncated past this many characters
    pub max_formatted_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            browsers: vec![
                "Safari".to_string(),
                "Google Chrome".to_string(),
                "Arc".to_string(),
                "Microsoft Edge".to_string(),
                "Brave Browser".to_string(),
            ],
            scriptable_apps: vec![
                "Safari".to_string(),
                "Finder".to_string(),
                "Mail".to_string(),
                "Notes".to_string(),
                "Calendar".to_string(),
                "Reminders".to_string(),
                "Pages".to_string(),
                "Numbers".to_string(),
                "Keynote".to_string(),
                "Microsoft Word".to_string(),
                "Microsoft Excel".to_string(),
            ],
            min_ax_elements: 5,
            min_ax_text_chars: 200,
            max_formatted_chars: 12_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Text longer than this many characters is pasted instead of typed
    pub paste_threshold: usize,
    pub fixed_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    /// Consecutive equal window counts that count as stable
    pub window_stable_polls: u32,
    pub typing_ms_per_char: u64,
    pub typing_wait_cap_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            paste_threshold: 64,
            fixed_delay_ms: 150,
            poll_interval_ms: 50,
            poll_timeout_ms: 2_000,
            window_stable_polls: 3,
            typing_ms_per_char: 8,
            typing_wait_cap_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tools never offered to the model
    pub disabled: Vec<String>,
    /// Tools that skip the approval prompt
    pub auto_approve: Vec<String>,
    /// Integration tools that never need approval (search, connection management)
    pub integration_safe: Vec<String>,
    /// Upper bound on one integration router call
    pub integration_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            auto_approve: Vec::new(),
            integration_safe: vec![
                "search_integrations".to_string(),
                "manage_connections".to_string(),
            ],
            integration_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub history_path: String,
    pub memory_path: String,
    /// Per-run settings written by the front end (provider, tool toggles)
    pub settings_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_path: "~/.local/share/deskpilot/history.jsonl".to_string(),
            memory_path: "~/.local/share/deskpilot/memory.jsonl".to_string(),
            settings_path: "~/.config/deskpilot/settings.json".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn history_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.history_path).as_ref())
    }

    pub fn memory_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.memory_path).as_ref())
    }

    pub fn settings_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.settings_path).as_ref())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut anthropic_configs = HashMap::new();
        anthropic_configs.insert(
            "default".to_string(),
            AnthropicConfig {
                api_key: String::new(),
                model: "claude-sonnet-4-5".to_string(),
                base_url: None,
                max_tokens: Some(8192),
                temperature: Some(0.1),
            },
        );

        Self {
            providers: ProvidersConfig {
                default_provider: "anthropic.default".to_string(),
                anthropic: anthropic_configs,
                openai: HashMap::new(),
                gemini: HashMap::new(),
                openai_compatible: HashMap::new(),
            },
            agent: AgentConfig::default(),
            computer_control: ComputerControlConfig::default(),
            extraction: ExtractionConfig::default(),
            sequencer: SequencerConfig::default(),
            tools: ToolsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Find the first existing config file among the default locations.
    fn find_default_path() -> Option<String> {
        DEFAULT_CONFIG_PATHS.iter().find_map(|path| {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                Some(expanded_path.to_string())
            } else {
                None
            }
        })
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(path) if Path::new(path).exists() => Some(path.to_string()),
            Some(path) => anyhow::bail!("Config file not found: {}", path),
            None => Self::find_default_path(),
        };

        let Some(path) = path else {
            // No config anywhere: write a default one the user can edit
            let default_config = Self::default();

            let config_dir = dirs::home_dir()
                .map(|mut path| {
                    path.push(".config");
                    path.push("deskpilot");
                    path
                })
                .unwrap_or_else(|| PathBuf::from("."));

            std::fs::create_dir_all(&config_dir).ok();

            let config_file = config_dir.join("config.toml");
            if let Err(e) = default_config.save(&config_file) {
                eprintln!("Warning: Could not save default config: {}", e);
            } else {
                println!(
                    "Created default configuration at: {}",
                    config_file.display()
                );
            }

            return Ok(default_config);
        };

        let config_content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&config_content)?;
        Ok(config)
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate_provider_reference(&config.providers.default_provider)?;
        Ok(config)
    }

    /// Validate a provider reference (format: "<provider_type>.<config_name>")
    fn validate_provider_reference(&self, reference: &str) -> Result<()> {
        let (provider_type, config_name) = Self::parse_provider_reference(reference)?;

        let available: Vec<&String> = match provider_type.as_str() {
            "anthropic" => self.providers.anthropic.keys().collect(),
            "openai" => self.providers.openai.keys().collect(),
            "gemini" => self.providers.gemini.keys().collect(),
            "openai_compatible" => self.providers.openai_compatible.keys().collect(),
            other => anyhow::bail!(
                "Unknown provider type '{}'. Valid types: anthropic, openai, gemini, openai_compatible",
                other
            ),
        };

        if !available.iter().any(|name| **name == config_name) {
            anyhow::bail!(
                "Provider config '{}.{}' not found. Available: {:?}",
                provider_type,
                config_name,
                available
            );
        }

        Ok(())
    }

    /// Parse a provider reference into (provider_type, config_name)
    pub fn parse_provider_reference(reference: &str) -> Result<(String, String)> {
        let parts: Vec<&str> = reference.split('.').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            anyhow::bail!(
                "Invalid provider reference '{}'. Expected format: '<provider_type>.<config_name>'",
                reference
            );
        }
        Ok((parts[0].to_string(), parts[1].to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn load_with_overrides(
        config_path: Option<&str>,
        provider_override: Option<String>,
        model_override: Option<String>,
    ) -> Result<Self> {
        let config = Self::load(config_path)?;
        config.with_overrides(provider_override, model_override)
    }

    /// Apply command-line provider and model overrides.
    pub fn with_overrides(
        mut self,
        provider_override: Option<String>,
        model_override: Option<String>,
    ) -> Result<Self> {
        if let Some(provider) = provider_override {
            self.validate_provider_reference(&provider)?;
            self.providers.default_provider = provider;
        }

        if let Some(model) = model_override {
            let (provider_type, config_name) =
                Self::parse_provider_reference(&self.providers.default_provider)?;

            let slot = match provider_type.as_str() {
                "anthropic" => self
                    .providers
                    .anthropic
                    .get_mut(&config_name)
                    .map(|c| &mut c.model),
                "openai" => self
                    .providers
                    .openai
                    .get_mut(&config_name)
                    .map(|c| &mut c.model),
                "gemini" => self
                    .providers
                    .gemini
                    .get_mut(&config_name)
                    .map(|c| &mut c.model),
                "openai_compatible" => self
                    .providers
                    .openai_compatible
                    .get_mut(&config_name)
                    .map(|c| &mut c.model),
                _ => None,
            };

            match slot {
                Some(slot) => *slot = model,
                None => anyhow::bail!(
                    "Provider config '{}.{}' not found.",
                    provider_type,
                    config_name
                ),
            }
        }

        Ok(self)
    }

    /// Get the current default provider's config
    pub fn get_default_provider_config(&self) -> Result<ProviderConfigRef<'_>> {
        let (provider_type, config_name) =
            Self::parse_provider_reference(&self.providers.default_provider)?;

        let found = match provider_type.as_str() {
            "anthropic" => self
                .providers
                .anthropic
                .get(&config_name)
                .map(ProviderConfigRef::Anthropic),
            "openai" => self
                .providers
                .openai
                .get(&config_name)
                .map(ProviderConfigRef::OpenAI),
            "gemini" => self
                .providers
                .gemini
                .get(&config_name)
                .map(ProviderConfigRef::Gemini),
            "openai_compatible" => self
                .providers
                .openai_compatible
                .get(&config_name)
                .map(ProviderConfigRef::OpenAICompatible),
            _ => None,
        };

        found.ok_or_else(|| {
            anyhow::anyhow!(
                "Provider config '{}' not found",
                self.providers.default_provider
            )
        })
    }
}

/// Reference to a provider configuration
#[derive(Debug)]
pub enum ProviderConfigRef<'a> {
    Anthropic(&'a AnthropicConfig),
    OpenAI(&'a OpenAIConfig),
    Gemini(&'a GeminiConfig),
    OpenAICompatible(&'a OpenAIConfig),
}

#[cfg(test)]
mod tests;
