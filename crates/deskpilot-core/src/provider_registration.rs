//! Provider registration from configuration.
//!
//! Every configured provider is registered, not only the default: the
//! per-run settings file may switch providers between runs without a
//! restart. Names follow `<provider_type>.<config_name>`, matching the
//! references accepted in the config file.

use anyhow::{Context, Result};
use deskpilot_config::Config;
use deskpilot_providers::{AnthropicProvider, GeminiProvider, OpenAIProvider, ProviderRegistry};
use tracing::debug;

/// Build a registry holding every configured provider, with the configured
/// default selected.
pub fn register_providers(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    register_anthropic_providers(config, &mut registry)?;
    register_openai_providers(config, &mut registry)?;
    register_openai_compatible_providers(config, &mut registry)?;
    register_gemini_providers(config, &mut registry)?;

    debug!(
        "Setting default provider to: {}",
        config.providers.default_provider
    );
    registry
        .set_default(&config.providers.default_provider)
        .with_context(|| {
            format!(
                "default provider '{}' is not configured",
                config.providers.default_provider
            )
        })?;

    Ok(registry)
}

fn register_anthropic_providers(config: &Config, registry: &mut ProviderRegistry) -> Result<()> {
    for (name, anthropic_config) in &config.providers.anthropic {
        let provider = AnthropicProvider::new_with_name(
            format!("anthropic.{}", name),
            anthropic_config.api_key.clone(),
            Some(anthropic_config.model.clone()),
            anthropic_config.base_url.clone(),
            anthropic_config.max_tokens,
            anthropic_config.temperature,
        )?;
        registry.register(provider);
    }
    Ok(())
}

fn register_openai_providers(config: &Config, registry: &mut ProviderRegistry) -> Result<()> {
    for (name, openai_config) in &config.providers.openai {
        let provider = OpenAIProvider::new_with_name(
            format!("openai.{}", name),
            openai_config.api_key.clone(),
            Some(openai_config.model.clone()),
            openai_config.base_url.clone(),
            openai_config.max_tokens,
            openai_config.temperature,
        )?
        .with_context_window(openai_config.context_window);
        registry.register(provider);
    }
    Ok(())
}

/// Local servers and routers that speak the OpenAI wire format.
fn register_openai_compatible_providers(
    config: &Config,
    registry: &mut ProviderRegistry,
) -> Result<()> {
    for (name, openai_config) in &config.providers.openai_compatible {
        let provider = OpenAIProvider::new_with_name(
            format!("openai_compatible.{}", name),
            openai_config.api_key.clone(),
            Some(openai_config.model.clone()),
            openai_config.base_url.clone(),
            openai_config.max_tokens,
            openai_config.temperature,
        )?
        .with_context_window(openai_config.context_window);
        registry.register(provider);
    }
    Ok(())
}

fn register_gemini_providers(config: &Config, registry: &mut ProviderRegistry) -> Result<()> {
    for (name, gemini_config) in &config.providers.gemini {
        let provider = GeminiProvider::new_with_name(
            format!("gemini.{}", name),
            gemini_config.api_key.clone(),
            Some(gemini_config.model.clone()),
            gemini_config.max_tokens,
            gemini_config.temperature,
        )?;
        registry.register(provider);
    }
    Ok(())
}
