use crate::{Config, ProviderConfigRef};
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> String {
    let config_path = dir.path().join("test_config.toml");
    fs::write(&config_path, content).unwrap();
    config_path.to_string_lossy().into_owned()
}

const MULTI_PROVIDER: &str = r#"
[providers]
default_provider = "anthropic.default"

[providers.anthropic.default]
api_key = "test-key"
model = "claude-sonnet-4-5"

[providers.gemini.fast]
api_key = "g-key"
model = "gemini-2.5-flash"

[providers.openai_compatible.local]
model = "qwen2.5-vl"
base_url = "http://localhost:11434/v1"
"#;

#[test]
fn test_minimal_config_fills_section_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, MULTI_PROVIDER);

    let config = Config::load(Some(&path)).unwrap();

    assert_eq!(config.agent.memory_flush_threshold_percent, 60.0);
    assert_eq!(config.agent.memory_flush_growth_percent, 30.0);
    assert_eq!(config.sequencer.paste_threshold, 64);
    assert!(config.extraction.browsers.iter().any(|b| b == "Safari"));
    assert!(config.tools.disabled.is_empty());
}

#[test]
fn test_sections_override_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let content = format!(
        r#"{}
[agent]
max_iterations = 4

[extraction]
browsers = ["Firefox"]
min_ax_elements = 2

[tools]
auto_approve = ["click"]
disabled = ["run_script"]
"#,
        MULTI_PROVIDER
    );
    let path = write_config(&temp_dir, &content);

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.agent.max_iterations, 4);
    assert_eq!(config.agent.max_retry_attempts, 3);
    assert_eq!(config.extraction.browsers, vec!["Firefox".to_string()]);
    assert_eq!(config.extraction.min_ax_elements, 2);
    assert_eq!(config.extraction.min_ax_text_chars, 200);
    assert_eq!(config.tools.auto_approve, vec!["click".to_string()]);
    assert_eq!(config.tools.disabled, vec!["run_script".to_string()]);
    assert_eq!(config.tools.integration_timeout_ms, 30_000);
    assert_eq!(config.tools.integration_safe.len(), 2);
}

#[test]
fn test_provider_override_and_model_override() {
    let config = Config::from_toml(MULTI_PROVIDER).unwrap();

    let config = config
        .with_overrides(
            Some("gemini.fast".to_string()),
            Some("gemini-2.5-pro".to_string()),
        )
        .unwrap();

    assert_eq!(config.providers.default_provider, "gemini.fast");
    match config.get_default_provider_config().unwrap() {
        ProviderConfigRef::Gemini(gemini) => assert_eq!(gemini.model, "gemini-2.5-pro"),
        other => panic!("expected gemini config, got {:?}", other),
    }
}

#[test]
fn test_openai_compatible_reference() {
    let config = Config::from_toml(MULTI_PROVIDER)
        .unwrap()
        .with_overrides(Some("openai_compatible.local".to_string()), None)
        .unwrap();

    match config.get_default_provider_config().unwrap() {
        ProviderConfigRef::OpenAICompatible(compat) => {
            assert!(compat.api_key.is_empty());
            assert_eq!(compat.base_url.as_deref(), Some("http://localhost:11434/v1"));
        }
        other => panic!("expected openai_compatible config, got {:?}", other),
    }
}

#[test]
fn test_invalid_provider_error() {
    let config = Config::from_toml(MULTI_PROVIDER).unwrap();

    let err = config
        .clone()
        .with_overrides(Some("openai.default".to_string()), None)
        .unwrap_err()
        .to_string();
    assert!(err.contains("not found"), "got: {}", err);

    let err = config
        .with_overrides(Some("databricks.default".to_string()), None)
        .unwrap_err()
        .to_string();
    assert!(err.contains("Unknown provider type"), "got: {}", err);
}

#[test]
fn test_default_provider_must_exist() {
    let result = Config::from_toml(
        r#"
[providers]
default_provider = "anthropic.missing"

[providers.anthropic.default]
api_key = "k"
model = "m"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_malformed_reference() {
    assert!(Config::parse_provider_reference("anthropic").is_err());
    assert!(Config::parse_provider_reference("a.b.c").is_err());
    assert!(Config::parse_provider_reference("anthropic.").is_err());
    assert_eq!(
        Config::parse_provider_reference("gemini.fast").unwrap(),
        ("gemini".to_string(), "fast".to_string())
    );
}

#[test]
fn test_missing_explicit_path_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");
    assert!(Config::load(Some(missing.to_str().unwrap())).is_err());
}

#[test]
fn test_default_config_round_trips_through_save() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("saved.toml");

    Config::default().save(&path).unwrap();
    let loaded = Config::load(Some(path.to_str().unwrap())).unwrap();

    assert_eq!(loaded.providers.default_provider, "anthropic.default");
    assert_eq!(
        loaded.tools.integration_safe,
        vec!["search_integrations".to_string(), "manage_connections".to_string()]
    );
}

#[test]
fn test_storage_paths_expand_tilde() {
    let config = Config::default();
    let history = config.storage.history_file();
    assert!(!history.to_string_lossy().starts_with('~'));
    assert!(history.ends_with("history.jsonl"));
}

#[test]
#[serial_test::serial]
fn test_load_finds_config_in_working_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("deskpilot.toml"), MULTI_PROVIDER).unwrap();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let loaded = Config::load(None);
    std::env::set_current_dir(previous).unwrap();

    let config = loaded.unwrap();
    assert!(config.providers.gemini.contains_key("fast"));
    assert_eq!(config.providers.default_provider, "anthropic.default");
}
