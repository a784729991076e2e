//! Host-side client for the kernel's HTTP surface.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use crate::backoff::Backoff;
use crate::kernel::lexer::is_identifier;
use crate::kernel::{ExecutionResult, VariableDescriptor, VariableValue};

/// Added to an exec timeout so the kernel's own reply wins a close race.
const EXEC_GRACE: Duration = Duration::from_secs(5);

/// Per-request bound for the cheap routes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Talks to one kernel. Timeouts on `exec` are enforced here, not by the
/// kernel.
#[derive(Clone)]
pub struct KernelClient {
    http: Client,
    base: Url,
}

impl KernelClient {
    /// `base_url` is the kernel's root, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid kernel URL {base_url:?}"))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("kernel URL must be http(s), got {base_url:?}");
        }
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("cannot build kernel URL for {path}"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value, timeout: Duration) -> Result<T> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .json(body)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// True if the kernel answers `/health` with `{"status": "ok"}`.
    pub async fn health(&self) -> bool {
        let Ok(url) = self.endpoint("/health") else {
            return false;
        };
        let reply = self.http.get(url).timeout(HEALTH_TIMEOUT).send().await;
        match reply {
            Ok(response) if response.status().is_success() => response
                .json::<Value>()
                .await
                .map(|body| body["status"] == "ok")
                .unwrap_or(false),
            Ok(_) => false,
            Err(e) => {
                debug!("Kernel health check failed: {e}");
                false
            }
        }
    }

    /// Polls `/health` with exponential backoff until the kernel answers or
    /// `budget` runs out.
    pub async fn wait_ready(&self, budget: Duration) -> Result<()> {
        let started = Instant::now();
        let mut delays = Backoff::readiness();
        loop {
            if self.health().await {
                info!("Kernel at {} is ready", self.base);
                return Ok(());
            }
            let delay = delays.next().unwrap_or(budget);
            if started.elapsed() + delay > budget {
                anyhow::bail!(
                    "kernel at {} not ready after {:?} ({} attempts)",
                    self.base,
                    budget,
                    delays.attempts()
                );
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs `code`. Gives up `timeout + 5s` after sending; the kernel keeps
    /// running the code regardless.
    pub async fn exec(&self, code: &str, timeout: Duration) -> Result<ExecutionResult> {
        let body = json!({ "code": code, "timeout": timeout.as_secs() });
        self.post_json("/exec", &body, timeout + EXEC_GRACE)
            .await
            .with_context(|| format!("exec failed (timeout {timeout:?})"))
    }

    pub async fn vars(&self) -> Result<Vec<VariableDescriptor>> {
        self.get_json("/vars").await
    }

    /// Fetches one variable. A missing name is an error.
    pub async fn get_var(&self, name: &str) -> Result<VariableValue> {
        let body: Value = self.get_json(&format!("/var/{name}")).await?;
        if let Some(message) = body.get("error").and_then(Value::as_str) {
            anyhow::bail!("{message}");
        }
        serde_json::from_value(body).context("unexpected /var reply")
    }

    pub async fn reset(&self) -> Result<()> {
        let _: Value = self
            .post_json("/reset", &json!({}), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Binds `text` to the kernel variable `name` without passing it
    /// through the code path as anything but a string literal.
    pub async fn load_text(&self, name: &str, text: &str) -> Result<()> {
        if !is_identifier(name) {
            anyhow::bail!("invalid variable name {name:?}");
        }
        let code = format!("{name} = {}", serde_json::to_string(text)?);
        let result = self.exec(&code, REQUEST_TIMEOUT).await?;
        if !result.output.is_empty() {
            anyhow::bail!("loading {name} failed: {}", result.output.trim_end());
        }
        debug!(name, chars = text.chars().count(), "loaded text into kernel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::kernel::server;
    use crate::wire::ServerHandle;

    async fn kernel() -> (ServerHandle, KernelClient) {
        let config = KernelConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            ..KernelConfig::default()
        };
        let handle = server::start(&config).await.unwrap();
        let client = KernelClient::new(&format!("http://{}", handle.local_addr())).unwrap();
        (handle, client)
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(KernelClient::new("not a url").is_err());
        assert!(KernelClient::new("ftp://kernel:21").is_err());
        assert!(KernelClient::new("http://127.0.0.1:8080").is_ok());
    }

    #[tokio::test]
    async fn test_exec_vars_and_reset() {
        let (handle, client) = kernel().await;
        client.wait_ready(Duration::from_secs(5)).await.unwrap();

        let result = client.exec("x = [1, 2]\nprint(len(x))", Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.output, "2\n");
        assert_eq!(result.vars, vec!["x".to_string()]);

        let vars = client.vars().await.unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].type_name, "list");
        assert_eq!(vars[0].summary, "[1, 2]");

        assert_eq!(
            client.get_var("x").await.unwrap(),
            VariableValue::Json(json!([1, 2]))
        );
        let err = client.get_var("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Variable 'nope' not found");

        client.reset().await.unwrap();
        assert!(client.vars().await.unwrap().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_text_escapes_everything() {
        let (handle, client) = kernel().await;
        let text = "line one\n\"quoted\" \\ back\ttab 'single' \u{1} é";
        client.load_text("context", text).await.unwrap();
        assert_eq!(
            client.get_var("context").await.unwrap(),
            VariableValue::Json(json!(text))
        );
        assert!(client.load_text("not valid", "x").await.is_err());
        assert!(client.load_text("for", "x").await.is_err());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_ready_gives_up() {
        let probe = crate::wire::bind("127.0.0.1", 0).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let client = KernelClient::new(&format!("http://127.0.0.1:{port}")).unwrap();
        assert!(!client.health().await);
        let err = client.wait_ready(Duration::from_millis(300)).await.unwrap_err();
        assert!(err.to_string().contains("not ready"));
    }
}
