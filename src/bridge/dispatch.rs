//! Hands prompts to the model client off the event loop.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::llm::{self, ModelClient};

/// Owns the single model-client handle and the bounded worker pool that
/// runs its blocking calls.
pub struct Dispatcher {
    client: OnceCell<Arc<dyn ModelClient>>,
    llm: LlmConfig,
    permits: Semaphore,
}

impl Dispatcher {
    /// The client is built from `llm` on first use.
    pub fn new(llm: LlmConfig, max_workers: usize) -> Self {
        Self {
            client: OnceCell::new(),
            llm,
            permits: Semaphore::new(max_workers.max(1)),
        }
    }

    pub fn with_client(client: Arc<dyn ModelClient>, max_workers: usize) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
            llm: LlmConfig::default(),
            permits: Semaphore::new(max_workers.max(1)),
        }
    }

    /// Returns the shared client, building it if no attempt has succeeded
    /// yet. Concurrent first uses wait on a single construction.
    pub async fn client(&self) -> Result<Arc<dyn ModelClient>> {
        self.client
            .get_or_try_init(|| async {
                let client = llm::build_client(&self.llm)?;
                info!("Model client ready: {}", client.description());
                Ok::<_, anyhow::Error>(client)
            })
            .await
            .cloned()
    }

    /// Eager construction at startup. A failure is only logged; dispatch
    /// retries.
    pub async fn warm_up(&self) {
        if let Err(e) = self.client().await {
            warn!("Model client not ready, will retry on first query: {e:#}");
        }
    }

    /// Runs `prompt` through the model on the blocking pool and shapes the
    /// reply into one string.
    pub async fn query(&self, prompt: String) -> Result<String> {
        let client = self.client().await?;
        let _permit = self.permits.acquire().await?;
        debug!(bytes = prompt.len(), "dispatching prompt");
        let reply = tokio::task::spawn_blocking(move || client.complete(&prompt))
            .await
            .map_err(|e| anyhow!("model client task failed: {e}"))??;
        Ok(shape_reply(reply))
    }
}

/// One completion text from whatever the client returned: the first
/// element of a non-empty list, otherwise the value's textual form.
pub fn shape_reply(reply: Value) -> String {
    match reply {
        Value::Array(items) if !items.is_empty() => {
            items.into_iter().next().map(text_of).unwrap_or_default()
        }
        other => text_of(other),
    }
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_returns_first_from_list() {
        assert_eq!(shape_reply(json!(["first", "second"])), "first");
    }

    #[test]
    fn test_stringifies_non_list() {
        assert_eq!(shape_reply(json!(42)), "42");
        assert_eq!(shape_reply(json!("plain")), "plain");
        assert_eq!(shape_reply(json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(shape_reply(json!([])), "[]");
        assert_eq!(shape_reply(json!([7, 8])), "7");
    }

    #[tokio::test]
    async fn test_query_passes_prompt_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let client = move |prompt: &str| -> Result<Value> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(json!([format!("got {prompt}")]))
        };
        let dispatcher = Dispatcher::with_client(Arc::new(client), 2);
        assert_eq!(dispatcher.query("test prompt".into()).await.unwrap(), "got test prompt");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_propagates() {
        let client = |_: &str| -> Result<Value> { Err(anyhow!("API error")) };
        let dispatcher = Dispatcher::with_client(Arc::new(client), 1);
        let err = dispatcher.query("x".into()).await.unwrap_err();
        assert_eq!(err.to_string(), "API error");
    }

    #[tokio::test]
    async fn test_client_panic_is_an_error() {
        let client = |_: &str| -> Result<Value> { panic!("model exploded") };
        let dispatcher = Dispatcher::with_client(Arc::new(client), 1);
        assert!(dispatcher.query("x".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_lazy_construction_retries() {
        let dispatcher = Dispatcher::new(
            LlmConfig {
                provider: "nope".into(),
                ..LlmConfig::default()
            },
            1,
        );
        dispatcher.warm_up().await;
        assert!(dispatcher.client().await.is_err());
        assert!(dispatcher.client().await.is_err());
    }

    #[tokio::test]
    async fn test_single_construction() {
        let dispatcher = Dispatcher::new(
            LlmConfig {
                provider: "ollama".into(),
                ..LlmConfig::default()
            },
            1,
        );
        let first = dispatcher.client().await.unwrap();
        let second = dispatcher.client().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
