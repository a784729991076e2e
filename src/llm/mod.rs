pub mod anthropic;
pub mod client;
pub mod ollama;

use std::sync::Arc;

pub use anthropic::AnthropicClient;
pub use client::ModelClient;
pub use ollama::OllamaClient;

use crate::config::LlmConfig;

/// Builds the model client selected by `[llm] provider`.
///
/// Must be called inside a tokio runtime.
pub fn build_client(config: &LlmConfig) -> anyhow::Result<Arc<dyn ModelClient>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::new(config.clone())?)),
        "ollama" => Ok(Arc::new(OllamaClient::new(config.clone())?)),
        other => anyhow::bail!("unknown LLM provider '{other}' (expected 'anthropic' or 'ollama')"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_client_by_provider() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            model: "llama3.2".to_string(),
            ..LlmConfig::default()
        };
        let client = build_client(&config).unwrap();
        assert_eq!(client.description(), "ollama (llama3.2)");

        let config = LlmConfig {
            api_key: "sk-test".to_string(),
            ..LlmConfig::default()
        };
        let client = build_client(&config).unwrap();
        assert_eq!(client.description(), "anthropic (claude-haiku-4-5-20251001)");
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..LlmConfig::default()
        };
        let err = build_client(&config).err().unwrap();
        assert!(err.to_string().contains("unknown LLM provider"));
    }
}
