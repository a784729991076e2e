use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::client::ModelClient;
use crate::config::LlmConfig;

const DEFAULT_ANTHROPIC_HOST: &str = "https://api.anthropic.com";

/// Client for Anthropic Messages API
pub struct AnthropicClient {
    client: Client,
    config: LlmConfig,
    endpoint: String,
    runtime: Handle,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicClient {
    /// Must be called inside a tokio runtime; requests are driven on it.
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("the anthropic provider needs llm.api_key (e.g. \"${{ANTHROPIC_API_KEY}}\")");
        }
        let host = config
            .host
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_HOST.to_string());
        let endpoint = format!("{}/v1/messages", host.trim_end_matches('/'));
        Ok(Self {
            client: Client::new(),
            config,
            endpoint,
            runtime: Handle::try_current()?,
        })
    }

    fn build_request(&self, prompt: &str) -> MessagesRequest {
        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens_per_request,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }

    async fn send(&self, prompt: &str) -> Result<String> {
        let request = self.build_request(prompt);

        debug!(
            "Calling Claude API ({}) with a {}-byte prompt",
            self.config.model,
            prompt.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            anyhow::bail!("Claude API error ({status}): {body}");
        }

        let resp: MessagesResponse = response.json().await?;
        let text = extract_text(&resp);

        let (input_tokens, output_tokens) = resp
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        info!("LLM response: {input_tokens} in / {output_tokens} out tokens");

        Ok(text)
    }
}

fn extract_text(resp: &MessagesResponse) -> String {
    resp.content
        .iter()
        .filter_map(|block| {
            if block.block_type == "text" {
                block.text.clone()
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl ModelClient for AnthropicClient {
    fn complete(&self, prompt: &str) -> Result<Value> {
        let text = self.runtime.block_on(self.send(prompt))?;
        Ok(json!([text]))
    }

    fn description(&self) -> String {
        format!("anthropic ({})", self.config.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: &str, host: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: "anthropic".to_string(),
            model: "claude-haiku-4-5-20251001".to_string(),
            api_key: api_key.to_string(),
            max_tokens_per_request: 1024,
            host: host.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_missing_api_key_is_rejected() {
        let err = AnthropicClient::new(config("", None)).err().unwrap();
        assert!(err.to_string().contains("llm.api_key"));
    }

    #[tokio::test]
    async fn test_description_and_endpoint() {
        let client = AnthropicClient::new(config("sk-test", None)).unwrap();
        assert_eq!(client.description(), "anthropic (claude-haiku-4-5-20251001)");
        assert_eq!(client.endpoint, "https://api.anthropic.com/v1/messages");

        let proxied = AnthropicClient::new(config("sk-test", Some("http://proxy:8000/"))).unwrap();
        assert_eq!(proxied.endpoint, "http://proxy:8000/v1/messages");
    }

    #[test]
    fn test_needs_a_runtime() {
        assert!(AnthropicClient::new(config("sk-test", None)).is_err());
    }

    #[tokio::test]
    async fn test_request_serialization() {
        let client = AnthropicClient::new(config("sk-test", None)).unwrap();
        let body = serde_json::to_value(client.build_request("hello")).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "claude-haiku-4-5-20251001",
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": "hello"}]
            })
        );
    }

    #[test]
    fn test_response_text_joins_text_blocks() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "first"},
                {"type": "tool_use", "id": "x", "name": "n", "input": {}},
                {"type": "text", "text": "second"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 3}
        }"#;
        let resp: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(extract_text(&resp), "first\nsecond");
        assert_eq!(resp.usage.unwrap().output_tokens, 3);
    }
}
