//! Ollama API provider.
//!
//! Calls `POST {host}/api/chat` with an Ollama-native request format.
//!
//! Key differences from Anthropic:
//! - No API key; the host is a local or LAN server.
//! - Token usage: `prompt_eval_count` / `eval_count` (may be absent).
//! - Must set `stream: false` for synchronous responses.

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::client::ModelClient;
use crate::config::LlmConfig;

/// Default Ollama API base URL.
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

// ── Ollama API request types ─────────────────────────────

/// Ollama `/api/chat` request body.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

/// Ollama message in the conversation.
#[derive(Debug, Serialize, Deserialize, Clone)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// Ollama generation options.
#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

// ── Ollama API response types ────────────────────────────

/// Ollama `/api/chat` response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

// ── OllamaClient ────────────────────────────────────────

/// Client for the Ollama API.
pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
    host: String,
    runtime: Handle,
}

impl OllamaClient {
    /// Creates a new Ollama client from configuration.
    ///
    /// If `config.host` is `None`, defaults to `http://localhost:11434`.
    /// Must be called inside a tokio runtime; requests are driven on it.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
        // Strip trailing slash for consistent URL construction
        let host = host.trim_end_matches('/').to_string();
        Ok(Self {
            client: Client::new(),
            config,
            host,
            runtime: Handle::try_current()?,
        })
    }

    fn build_request(&self, prompt: &str) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.config.model.clone(),
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: OllamaOptions {
                num_predict: self.config.max_tokens_per_request,
            },
        }
    }

    async fn send(&self, prompt: &str) -> Result<String> {
        let request = self.build_request(prompt);
        let url = format!("{}/api/chat", self.host);

        debug!(
            "Calling Ollama API ({}) with a {}-byte prompt",
            self.config.model,
            prompt.len()
        );

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({status}): {body}");
        }

        let resp: OllamaChatResponse = response.json().await?;

        let input_tokens = resp.prompt_eval_count.unwrap_or(0);
        let output_tokens = resp.eval_count.unwrap_or(0);

        info!("LLM response: {input_tokens} in / {output_tokens} out tokens");

        Ok(resp.message.content)
    }
}

impl ModelClient for OllamaClient {
    fn complete(&self, prompt: &str) -> Result<Value> {
        let text = self.runtime.block_on(self.send(prompt))?;
        Ok(json!([text]))
    }

    fn description(&self) -> String {
        format!("{} ({})", self.config.provider, self.config.model)
    }
}
