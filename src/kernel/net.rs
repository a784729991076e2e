//! Outbound HTTP used by the `http_post` builtin.

use std::cell::OnceCell;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value as Json;
use tracing::debug;

use super::fault::{Fault, FaultKind};
use super::value::Value;

/// Lazily built blocking HTTP client owned by one kernel.
///
/// Must only be used off any async runtime thread (the kernel worker
/// thread qualifies).
#[derive(Default)]
pub struct HttpAccess {
    client: OnceCell<Client>,
}

impl HttpAccess {
    fn client(&self) -> Result<&Client, Fault> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .build()
            .map_err(|e| Fault::new(FaultKind::ConnectionError, e.to_string()))?;
        Ok(self.client.get_or_init(|| client))
    }

    /// POSTs `body` as JSON and decodes the reply, whatever its status.
    /// A non-JSON reply comes back as a plain string.
    pub fn post_json(&self, url: &str, body: &Json, timeout: Duration) -> Result<Value, Fault> {
        debug!(url, "http_post");
        let response = self
            .client()?
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .map_err(|e| connection_error(url, e))?;
        let status = response.status();
        let text = response.text().map_err(|e| connection_error(url, e))?;
        debug!(url, status = status.as_u16(), bytes = text.len(), "http_post reply");
        Ok(match serde_json::from_str::<Json>(&text) {
            Ok(json) => Value::from_json(&json),
            Err(_) => Value::Str(text),
        })
    }
}

fn connection_error(url: &str, err: reqwest::Error) -> Fault {
    let reason = if err.is_timeout() {
        "timed out".to_string()
    } else {
        err.to_string()
    };
    Fault::new(
        FaultKind::ConnectionError,
        format!("POST {url} failed: {reason}"),
    )
}
