//! LLM provider implementations.
//!
//! Provides concrete implementations of the `LlmProvider` trait for:
//! - OpenAI-compatible APIs (OpenAI, Groq, Ollama)
//! - Anthropic Messages API
//!
//! Use `create_provider()` to instantiate the appropriate provider for a role.

pub mod anthropic;
pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, ProviderKind};
use crate::error::ConfigError;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatibleProvider;

/// Create a provider for one model.
///
/// The API key is read from the endpoint's configured environment variable.
/// Local Ollama endpoints don't require one.
pub fn create_provider(
    kind: ProviderKind,
    model: &str,
    config: &LlmConfig,
) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    let endpoint = config.endpoint(kind);
    let api_key = match std::env::var(&endpoint.api_key_env) {
        Ok(key) if !key.trim().is_empty() => key,
        _ if kind == ProviderKind::Ollama => {
            debug!("No API key set for Ollama; using placeholder bearer token");
            "ollama".to_string()
        }
        _ => {
            return Err(ConfigError::EnvVarMissing {
                var: endpoint.api_key_env.clone(),
            });
        }
    };
    let timeout = Duration::from_secs(config.timeout_secs);
    let base_url = endpoint.base_url.as_deref();

    let provider: Arc<dyn LlmProvider> = match kind {
        ProviderKind::Anthropic => Arc::new(
            AnthropicProvider::new(model, api_key, base_url, config.max_tokens, timeout)
                .map_err(|e| ConfigError::Invalid {
                    message: e.to_string(),
                })?,
        ),
        ProviderKind::OpenAi | ProviderKind::Groq | ProviderKind::Ollama => Arc::new(
            OpenAiCompatibleProvider::new(model, api_key, base_url, config.max_tokens, timeout)
                .map_err(|e| ConfigError::Invalid {
                    message: e.to_string(),
                })?,
        ),
    };
    Ok(provider)
}
