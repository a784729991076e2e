//! Host-side callback bridge.
//!
//! Code running in the sandboxed kernel reaches the model through
//! `POST /llm_query {"prompt": ...}`. Each connection walks one explicit
//! state machine and every read in it is bounded; a stalled client gets
//! 408 instead of holding the connection forever.

pub mod dispatch;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::config::{BridgeConfig, LlmConfig};
use crate::llm::ModelClient;
use crate::wire::{self, ConnectionHandler, ReadError, RequestLine, Response, ServerHandle};
pub use dispatch::{shape_reply, Dispatcher};

/// The one path the bridge answers.
pub const CALLBACK_PATH: &str = "/llm_query";

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    #[serde(default)]
    prompt: String,
}

// ── Connection state machine ─────────────────────────────

/// Where a connection is. Closing is the absence of a next phase.
enum Phase {
    AwaitRequestLine,
    AwaitHeaders {
        request: RequestLine,
        content_length: usize,
        headers: usize,
    },
    AwaitBody {
        request: RequestLine,
        content_length: usize,
    },
    Dispatch {
        request: RequestLine,
        body: Vec<u8>,
    },
    Respond(Response),
}

struct BridgeConnection {
    dispatcher: Arc<Dispatcher>,
    read_timeout: Duration,
}

impl BridgeConnection {
    /// Runs one phase and returns the next; `None` closes the connection.
    async fn step(
        &self,
        phase: Phase,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        peer: SocketAddr,
    ) -> Option<Phase> {
        match phase {
            Phase::AwaitRequestLine => match wire::read_line_bounded(reader, self.read_timeout).await {
                Ok(line) if line.is_empty() => None,
                Ok(line) => match wire::parse_request_line(&line) {
                    Ok(request) => Some(Phase::AwaitHeaders {
                        request,
                        content_length: 0,
                        headers: 0,
                    }),
                    Err(e) => read_failed(e),
                },
                Err(e) => read_failed(e),
            },
            Phase::AwaitHeaders {
                request,
                content_length,
                headers,
            } => match wire::read_line_bounded(reader, self.read_timeout).await {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        return Some(Phase::AwaitBody {
                            request,
                            content_length,
                        });
                    }
                    if headers >= wire::MAX_HEADERS {
                        return read_failed(ReadError::Malformed("too many headers".into()));
                    }
                    match wire::parse_content_length(line) {
                        Ok(declared) => Some(Phase::AwaitHeaders {
                            request,
                            content_length: declared.unwrap_or(content_length),
                            headers: headers + 1,
                        }),
                        Err(e) => read_failed(e),
                    }
                }
                Err(e) => read_failed(e),
            },
            Phase::AwaitBody {
                request,
                content_length,
            } => match wire::read_exact_bounded(reader, content_length, self.read_timeout).await {
                Ok(body) => Some(Phase::Dispatch { request, body }),
                Err(e) => read_failed(e),
            },
            Phase::Dispatch { request, body } => {
                Some(Phase::Respond(self.dispatch(request, body).await))
            }
            Phase::Respond(response) => {
                debug!(%peer, status = response.status, "callback response");
                if let Err(e) = wire::write_response(writer, &response).await {
                    debug!(%peer, "failed to write callback response: {e}");
                }
                None
            }
        }
    }

    async fn dispatch(&self, request: RequestLine, body: Vec<u8>) -> Response {
        if request.method != "POST" || request.path != CALLBACK_PATH {
            debug!(method = %request.method, path = %request.path, "no such callback route");
            return Response::not_found();
        }
        let prompt = match serde_json::from_slice::<CallbackRequest>(&body) {
            Ok(parsed) => parsed.prompt,
            Err(e) => {
                warn!("Unparsable callback body: {e}");
                return Response::error(400, "invalid request");
            }
        };
        if prompt.is_empty() {
            return Response::error(400, "missing prompt");
        }
        match self.dispatcher.query(prompt).await {
            Ok(result) => Response::ok(json!({ "result": result })),
            Err(e) => {
                error!("llm_query dispatch failed: {e:#}");
                Response::error(500, "internal error")
            }
        }
    }
}

fn read_failed(e: ReadError) -> Option<Phase> {
    match e {
        ReadError::Timeout => {
            warn!("Callback request timed out");
            Some(Phase::Respond(Response::error(408, "timeout")))
        }
        ReadError::Io(e) => {
            debug!("Callback connection failed: {e}");
            None
        }
        other => {
            warn!("Bad callback request: {other}");
            Some(Phase::Respond(Response::error(400, "invalid request")))
        }
    }
}

#[async_trait]
impl ConnectionHandler for BridgeConnection {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut phase = Some(Phase::AwaitRequestLine);
        while let Some(current) = phase {
            phase = self.step(current, &mut reader, &mut writer, peer).await;
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────

/// The callback server plus the model client it dispatches to.
pub struct CallbackBridge {
    config: BridgeConfig,
    dispatcher: Arc<Dispatcher>,
    server: Option<ServerHandle>,
    bound_port: Option<u16>,
}

impl CallbackBridge {
    /// The model client is built from `llm` when the bridge starts.
    pub fn new(config: BridgeConfig, llm: LlmConfig) -> Self {
        let dispatcher = Dispatcher::new(llm, config.max_workers);
        Self::with_dispatcher(config, dispatcher)
    }

    /// Uses `client` as is; no provider is constructed.
    pub fn with_client(config: BridgeConfig, client: Arc<dyn ModelClient>) -> Self {
        let dispatcher = Dispatcher::with_client(client, config.max_workers);
        Self::with_dispatcher(config, dispatcher)
    }

    fn with_dispatcher(config: BridgeConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            server: None,
            bound_port: None,
        }
    }

    /// The port actually bound, or the configured one before the first start.
    pub fn port(&self) -> u16 {
        self.bound_port.unwrap_or(self.config.port)
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    /// URL the sandboxed kernel uses to reach the bridge.
    pub fn callback_url(&self) -> String {
        format!(
            "http://{}:{}{CALLBACK_PATH}",
            self.config.host_alias,
            self.port()
        )
    }

    /// Loopback URL, for a kernel running on the host itself.
    pub fn callback_url_local(&self) -> String {
        format!("http://127.0.0.1:{}{CALLBACK_PATH}", self.port())
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.server.is_some() {
            anyhow::bail!("callback bridge already running on port {}", self.port());
        }
        self.dispatcher.warm_up().await;

        let listener = wire::bind(&self.config.bind, self.config.port)
            .await
            .with_context(|| {
                format!(
                    "failed to bind callback bridge on {}:{}",
                    self.config.bind, self.config.port
                )
            })?;
        let connection = Arc::new(BridgeConnection {
            dispatcher: Arc::clone(&self.dispatcher),
            read_timeout: Duration::from_millis(self.config.read_timeout_ms),
        });
        let server = wire::serve(listener, connection)?;
        info!("LLM callback server listening on {}", server.local_addr());
        self.bound_port = Some(server.local_addr().port());
        self.server = Some(server);
        Ok(())
    }

    /// Returns once the listening socket is closed, so the port can be
    /// bound again straight away.
    pub async fn stop(&mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown().await;
            info!("LLM callback server stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            ..BridgeConfig::default()
        }
    }

    fn mocked(reply: Value) -> Arc<dyn ModelClient> {
        Arc::new(move |_: &str| -> anyhow::Result<Value> { Ok(reply.clone()) })
    }

    async fn started(config: BridgeConfig, client: Arc<dyn ModelClient>) -> CallbackBridge {
        let mut bridge = CallbackBridge::with_client(config, client);
        bridge.start().await.unwrap();
        bridge
    }

    async fn send(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    fn parse(reply: &str) -> (u16, Value) {
        let (head, body) = reply.split_once("\r\n\r\n").unwrap();
        let status = head.split_whitespace().nth(1).unwrap().parse().unwrap();
        (status, serde_json::from_str(body).unwrap())
    }

    async fn query(addr: SocketAddr, body: &str) -> (u16, Value) {
        let raw = format!(
            "POST /llm_query HTTP/1.1\r\nHost: bridge\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        parse(&send(addr, raw.as_bytes()).await)
    }

    #[test]
    fn test_default_port_and_urls() {
        let bridge = CallbackBridge::new(BridgeConfig::default(), LlmConfig::default());
        assert_eq!(bridge.port(), 8081);
        assert!(!bridge.is_running());
        assert_eq!(
            bridge.callback_url(),
            "http://host.docker.internal:8081/llm_query"
        );
        assert_eq!(bridge.callback_url_local(), "http://127.0.0.1:8081/llm_query");
    }

    #[tokio::test]
    async fn test_happy_path() {
        let mut bridge = started(test_config(), mocked(json!(["mocked response"]))).await;
        let addr = bridge.local_addr().unwrap();

        let (status, body) = query(addr, r#"{"prompt": "hello"}"#).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"result": "mocked response"}));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_response_headers() {
        let mut bridge = started(test_config(), mocked(json!(["ok"]))).await;
        let raw = b"POST /llm_query HTTP/1.1\r\nContent-Length: 15\r\n\r\n{\"prompt\":\"hi\"}";
        let reply = send(bridge.local_addr().unwrap(), raw).await;
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("Content-Type: application/json\r\n"));
        assert!(reply.contains("Content-Length: 15\r\n"));
        assert!(reply.contains("Connection: close\r\n"));
        assert!(reply.ends_with(r#"{"result":"ok"}"#));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_missing_prompt() {
        let mut bridge = started(test_config(), mocked(json!(["unused"]))).await;
        let addr = bridge.local_addr().unwrap();

        assert_eq!(
            query(addr, r#"{"prompt": ""}"#).await,
            (400, json!({"error": "missing prompt"}))
        );
        assert_eq!(
            query(addr, "{}").await,
            (400, json!({"error": "missing prompt"}))
        );

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let mut bridge = started(test_config(), mocked(json!(["unused"]))).await;
        let addr = bridge.local_addr().unwrap();

        assert_eq!(
            query(addr, "not json").await,
            (400, json!({"error": "invalid request"}))
        );
        let bad_length = b"POST /llm_query HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert_eq!(parse(&send(addr, bad_length).await).0, 400);
        assert_eq!(parse(&send(addr, b"NONSENSE\r\n\r\n").await).0, 400);

        // body shorter than declared, then the client stops writing
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST /llm_query HTTP/1.1\r\nContent-Length: 50\r\n\r\n{\"pro")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert_eq!(parse(&reply), (400, json!({"error": "invalid request"})));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_wrong_path_or_method() {
        let mut bridge = started(test_config(), mocked(json!(["unused"]))).await;
        let addr = bridge.local_addr().unwrap();

        let reply = send(addr, b"GET /wrong HTTP/1.1\r\n\r\n").await;
        assert_eq!(parse(&reply), (404, json!({"error": "not found"})));
        let reply = send(addr, b"GET /llm_query HTTP/1.1\r\n\r\n").await;
        assert_eq!(parse(&reply).0, 404);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_client_error_is_500() {
        let failing = |_: &str| -> anyhow::Result<Value> { Err(anyhow!("API error")) };
        let mut bridge = started(test_config(), Arc::new(failing)).await;

        let (status, body) = query(bridge.local_addr().unwrap(), r#"{"prompt": "test"}"#).await;
        assert_eq!(status, 500);
        assert_eq!(body, json!({"error": "internal error"}));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_client_panic_is_500_and_bridge_survives() {
        let flaky = |prompt: &str| -> anyhow::Result<Value> {
            if prompt == "boom" {
                panic!("model crashed");
            }
            Ok(json!([prompt.to_uppercase()]))
        };
        let mut bridge = started(test_config(), Arc::new(flaky)).await;
        let addr = bridge.local_addr().unwrap();

        assert_eq!(query(addr, r#"{"prompt": "boom"}"#).await.0, 500);
        assert_eq!(
            query(addr, r#"{"prompt": "still here"}"#).await,
            (200, json!({"result": "STILL HERE"}))
        );

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_non_list_reply_is_stringified() {
        let mut bridge = started(test_config(), mocked(json!(42))).await;
        let (status, body) = query(bridge.local_addr().unwrap(), r#"{"prompt": "test"}"#).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"result": "42"}));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_first_candidate_wins() {
        let mut bridge = started(test_config(), mocked(json!(["first", "second"]))).await;
        let (_, body) = query(bridge.local_addr().unwrap(), r#"{"prompt": "test"}"#).await;
        assert_eq!(body, json!({"result": "first"}));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_stalled_request_line_times_out() {
        let config = BridgeConfig {
            read_timeout_ms: 100,
            ..test_config()
        };
        let mut bridge = started(config, mocked(json!(["unused"]))).await;

        let mut stream = TcpStream::connect(bridge.local_addr().unwrap()).await.unwrap();
        stream.write_all(b"POST /llm_qu").await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert_eq!(parse(&reply), (408, json!({"error": "timeout"})));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let config = BridgeConfig {
            read_timeout_ms: 100,
            ..test_config()
        };
        let mut bridge = started(config, mocked(json!(["unused"]))).await;

        let mut stream = TcpStream::connect(bridge.local_addr().unwrap()).await.unwrap();
        stream
            .write_all(b"POST /llm_query HTTP/1.1\r\nContent-Length: 20\r\n\r\n{\"prompt\"")
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert_eq!(parse(&reply).0, 408);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_stalled_headers_times_out() {
        let config = BridgeConfig {
            read_timeout_ms: 100,
            ..test_config()
        };
        let mut bridge = started(config, mocked(json!(["unused"]))).await;

        let mut stream = TcpStream::connect(bridge.local_addr().unwrap()).await.unwrap();
        stream
            .write_all(b"POST /llm_query HTTP/1.1\r\nContent-Length: 5\r\n")
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        let (status, body) = parse(&reply);
        assert_eq!(status, 408);
        assert_eq!(body, json!({"error": "timeout"}));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_silent_disconnect_gets_no_reply() {
        let mut bridge = started(test_config(), mocked(json!(["unused"]))).await;
        let mut stream = TcpStream::connect(bridge.local_addr().unwrap()).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.is_empty());
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_slow_dispatch_does_not_block_others() {
        let client = |prompt: &str| -> anyhow::Result<Value> {
            if prompt == "slow" {
                std::thread::sleep(Duration::from_millis(800));
            }
            Ok(json!([prompt]))
        };
        let mut bridge = started(test_config(), Arc::new(client)).await;
        let addr = bridge.local_addr().unwrap();

        let slow = tokio::spawn(async move { query(addr, r#"{"prompt": "slow"}"#).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let fast = tokio::time::timeout(
            Duration::from_millis(500),
            query(addr, r#"{"prompt": "fast"}"#),
        )
        .await
        .expect("fast query waited behind the slow one");
        assert_eq!(fast, (200, json!({"result": "fast"})));
        assert!(!slow.is_finished());

        assert_eq!(slow.await.unwrap(), (200, json!({"result": "slow"})));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_restart_on_same_port() {
        // a free port to pin the bridge to
        let probe = wire::bind("127.0.0.1", 0).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let config = BridgeConfig {
            port,
            ..test_config()
        };
        let mut bridge = CallbackBridge::with_client(config, mocked(json!(["again"])));
        bridge.start().await.unwrap();
        assert!(bridge.is_running());
        bridge.stop().await;
        assert!(!bridge.is_running());

        bridge.start().await.unwrap();
        assert_eq!(bridge.port(), port);
        let (status, _) = query(bridge.local_addr().unwrap(), r#"{"prompt": "x"}"#).await;
        assert_eq!(status, 200);
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_is_an_error() {
        let mut bridge = started(test_config(), mocked(json!(["x"]))).await;
        assert!(bridge.start().await.is_err());
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut bridge = CallbackBridge::new(test_config(), LlmConfig::default());
        bridge.stop().await;
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn test_unbuildable_provider_still_serves() {
        let llm = LlmConfig {
            provider: "nope".into(),
            ..LlmConfig::default()
        };
        let mut bridge = CallbackBridge::new(test_config(), llm);
        bridge.start().await.unwrap();
        let (status, _) = query(bridge.local_addr().unwrap(), r#"{"prompt": "x"}"#).await;
        assert_eq!(status, 500);
        bridge.stop().await;
    }
}
