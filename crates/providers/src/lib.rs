//! LLM Provider implementations for the catalog copilot.
//!
//! All providers implement the `copilot_core::Provider` trait.
//! [`build_from_config`] selects the provider named in the configuration.

pub mod anthropic;
pub mod scripted;

use std::sync::Arc;

use copilot_config::AppConfig;
use copilot_core::Provider;
use copilot_core::error::ProviderError;

pub use anthropic::AnthropicProvider;
pub use scripted::ScriptedProvider;

/// Validate `config` and build the configured provider.
///
/// Per-provider sections (`[providers.<name>]`) override the global API key
/// and model; `api_url` replaces the default endpoint.
pub fn build_from_config(config: &AppConfig) -> copilot_core::Result<Arc<dyn Provider>> {
    config.validate()?;
    let name = config.provider.as_str();
    match name {
        "anthropic" => {
            let api_key = config.api_key_for(name).ok_or_else(|| {
                ProviderError::NotConfigured(
                    "no API key set (COPILOT_API_KEY or ANTHROPIC_API_KEY)".into(),
                )
            })?;

            let mut provider = AnthropicProvider::new(api_key)
                .with_model(config.model_for(name))
                .with_max_tokens(config.max_tokens)
                .with_temperature(config.temperature)
                .with_timeout(config.assistant.request_timeout());
            if let Some(url) = config.providers.get(name).and_then(|p| p.api_url.as_deref()) {
                provider = provider.with_base_url(url);
            }

            tracing::debug!(provider = name, model = %config.model_for(name), "Provider configured");
            Ok(Arc::new(provider))
        }
        other => Err(ProviderError::NotConfigured(format!(
            "unknown provider '{other}' (supported: anthropic)"
        ))
        .into()),
    }
}
