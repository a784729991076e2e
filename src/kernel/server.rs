//! HTTP surface of the kernel: `/exec`, `/vars`, `/var/<name>`, `/reset`,
//! `/health`.
//!
//! Code faults are reported inside a 200 body, never as an HTTP error.
//! Unknown routes and unparsable requests get 404.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::{KernelError, KernelHandle};
use crate::config::KernelConfig;
use crate::wire::{self, ConnectionHandler, ReadError, Request, Response, ServerHandle};

#[derive(Debug, Default, Deserialize)]
struct ExecRequest {
    #[serde(default)]
    code: String,
    /// Advisory; enforcement is the caller's job.
    #[serde(default)]
    timeout: Option<u64>,
}

pub struct KernelServer {
    kernel: KernelHandle,
    read_timeout: Duration,
}

impl KernelServer {
    pub fn new(kernel: KernelHandle, read_timeout: Duration) -> Self {
        Self {
            kernel,
            read_timeout,
        }
    }

    async fn route(&self, request: Request) -> Response {
        let Request { method, path, body } = request;
        let outcome = match (method.as_str(), path.as_str()) {
            ("POST", "/exec") => {
                let exec: ExecRequest = serde_json::from_slice(&body).unwrap_or_default();
                debug!(bytes = exec.code.len(), timeout = ?exec.timeout, "exec");
                self.kernel
                    .execute(exec.code)
                    .await
                    .map(|result| json!(result))
            }
            ("GET", "/vars") => self.kernel.list_vars().await.map(|vars| json!(vars)),
            ("GET", p) if p.starts_with("/var/") => {
                let name = &p["/var/".len()..];
                match self.kernel.get_var(name.to_string()).await {
                    Ok(value) => Ok(json!(value)),
                    Err(e @ KernelError::NotFound(_)) => Ok(json!({ "error": e.to_string() })),
                    Err(e) => Err(e),
                }
            }
            ("POST", "/reset") => self
                .kernel
                .reset()
                .await
                .map(|()| json!({ "status": "ok" })),
            ("GET", "/health") => Ok(json!({ "status": "ok" })),
            _ => return Response::not_found(),
        };
        match outcome {
            Ok(body) => Response::ok(body),
            Err(e) => {
                warn!("Kernel request failed: {e}");
                Response::error(500, &e.to_string())
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for KernelServer {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let response = match wire::read_request(&mut reader, self.read_timeout).await {
            Ok(Some(request)) => {
                debug!(%peer, method = %request.method, path = %request.path, "kernel request");
                self.route(request).await
            }
            Ok(None) => return,
            Err(ReadError::Timeout) | Err(ReadError::Io(_)) => {
                debug!(%peer, "kernel connection dropped while reading");
                return;
            }
            Err(e) => {
                debug!(%peer, "unparsable kernel request: {e}");
                Response::not_found()
            }
        };
        if let Err(e) = wire::write_response(&mut writer, &response).await {
            debug!(%peer, "failed to write kernel response: {e}");
        }
    }
}

/// Spawns the kernel worker and starts serving it.
pub async fn start(config: &KernelConfig) -> anyhow::Result<ServerHandle> {
    let kernel = KernelHandle::spawn().context("failed to spawn kernel worker")?;
    let listener = wire::bind(&config.bind, config.port)
        .await
        .with_context(|| format!("failed to bind kernel on {}:{}", config.bind, config.port))?;
    let server = Arc::new(KernelServer::new(
        kernel,
        Duration::from_millis(config.read_timeout_ms),
    ));
    let handle = wire::serve(listener, server)?;
    info!("Kernel listening on {}", handle.local_addr());
    Ok(handle)
}
