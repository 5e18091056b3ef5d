//! Model provider implementations for Talk2SQL.
//!
//! All providers implement the `talk2sql_core::Provider` trait.
//! `build_from_config` selects and configures one from `AppConfig`.

pub mod openai_compat;
pub mod prompt;

use std::sync::Arc;
use talk2sql_config::AppConfig;
use talk2sql_core::error::ProviderError;
use talk2sql_core::provider::Provider;

pub use openai_compat::OpenAiCompatProvider;

/// Build the configured provider.
///
/// Every backend speaks the OpenAI chat-completions protocol; only Ollama
/// runs without an API key.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let settings = &config.provider;

    let api_key = match (settings.name.as_str(), config.api_key.as_deref()) {
        ("ollama", key) => key.unwrap_or("ollama").to_string(),
        (_, Some(key)) => key.to_string(),
        (name, None) => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{name}' (set TALK2SQL_API_KEY or api_key in config.toml)"
            )));
        }
    };

    let mut provider = OpenAiCompatProvider::new(&settings.name, &settings.base_url, api_key)
        .with_model(&settings.model)
        .with_temperature(settings.temperature)
        .with_timeout(std::time::Duration::from_secs(settings.timeout_secs));
    if let Some(max_tokens) = settings.max_tokens {
        provider = provider.with_max_tokens(max_tokens);
    }

    tracing::info!(
        provider = %settings.name,
        model = %settings.model,
        "Model provider configured"
    );
    Ok(Arc::new(provider))
}
