//! `ModelClient` trait: abstraction over the model behind `llm_query()`.
//!
//! Providers (Anthropic, Ollama, …) implement this trait so the bridge
//! can be configured to use any supported backend via the `[llm] provider`
//! config field. Plain closures implement it too, which is how tests stub
//! the model.

use anyhow::Result;
use serde_json::Value;

/// A model answering single prompts.
///
/// `complete` is blocking: it must be called from a thread that may block
/// (the bridge runs it on `spawn_blocking`), never directly on an async
/// worker thread.
pub trait ModelClient: Send + Sync {
    /// Runs `prompt` through the model.
    ///
    /// The reply is either a list of candidate completions (the bridge
    /// keeps the first) or any other JSON value, which the bridge turns
    /// into text.
    fn complete(&self, prompt: &str) -> Result<Value>;

    /// Human-readable description of the provider and model.
    ///
    /// Used in log output, e.g. `"anthropic (claude-haiku-4-5-20251001)"`.
    fn description(&self) -> String;
}

impl<F> ModelClient for F
where
    F: Fn(&str) -> Result<Value> + Send + Sync,
{
    fn complete(&self, prompt: &str) -> Result<Value> {
        self(prompt)
    }

    fn description(&self) -> String {
        "custom".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Compile-time verification that `ModelClient` is object-safe.
    #[test]
    fn test_model_client_is_object_safe() {
        fn _assert_object_safe(_: &dyn ModelClient) {}
    }

    #[test]
    fn test_closure_is_a_client() {
        let echo = |prompt: &str| -> Result<Value> { Ok(json!([format!("echo: {prompt}")])) };
        let client: &dyn ModelClient = &echo;
        assert_eq!(client.complete("hi").unwrap(), json!(["echo: hi"]));
        assert_eq!(client.description(), "custom");
    }
}
