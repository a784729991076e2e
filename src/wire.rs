//! Minimal HTTP/1.1 plumbing shared by the kernel server and the callback
//! bridge.
//!
//! Both servers speak one request per connection and always close after the
//! response. Every read is bounded in time and size.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest accepted request or header line, terminator included.
pub const MAX_LINE: usize = 8 * 1024;

/// Largest accepted request body.
pub const MAX_BODY: usize = 64 * 1024 * 1024;

/// Header lines accepted before the request is rejected.
pub const MAX_HEADERS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("read timed out")]
    Timeout,
    #[error("line exceeds {MAX_LINE} bytes")]
    LineTooLong,
    #[error("body of {0} bytes exceeds limit")]
    BodyTooLarge(usize),
    #[error("connection closed after {received} of {expected} body bytes")]
    Truncated { expected: usize, received: usize },
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ── Bounded reads ───────────────────────────────────

/// Reads one line, terminator included. Returns an empty string at EOF.
pub async fn read_line_bounded<R>(reader: &mut R, wait: Duration) -> Result<String, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = reader.take(MAX_LINE as u64 + 1);
    tokio::time::timeout(wait, limited.read_until(b'\n', &mut buf))
        .await
        .map_err(|_| ReadError::Timeout)??;
    if buf.len() > MAX_LINE {
        return Err(ReadError::LineTooLong);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Reads exactly `len` bytes.
pub async fn read_exact_bounded<R>(
    reader: &mut R,
    len: usize,
    wait: Duration,
) -> Result<Vec<u8>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    if len > MAX_BODY {
        return Err(ReadError::BodyTooLarge(len));
    }
    let mut body = Vec::with_capacity(len);
    let mut limited = reader.take(len as u64);
    let received = tokio::time::timeout(wait, limited.read_to_end(&mut body))
        .await
        .map_err(|_| ReadError::Timeout)??;
    if received < len {
        return Err(ReadError::Truncated {
            expected: len,
            received,
        });
    }
    Ok(body)
}

// ── Request parsing ─────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RequestLine {
    pub method: String,
    /// Request target without its query string.
    pub path: String,
}

pub fn parse_request_line(line: &str) -> Result<RequestLine, ReadError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => {
            let path = target.split('?').next().unwrap_or(target);
            Ok(RequestLine {
                method: method.to_string(),
                path: path.to_string(),
            })
        }
        _ => Err(ReadError::Malformed(format!(
            "bad request line {:?}",
            line.trim_end()
        ))),
    }
}

/// Returns the declared body length if `line` is a `Content-Length` header
/// (matched case-insensitively).
pub fn parse_content_length(line: &str) -> Result<Option<usize>, ReadError> {
    let Some((name, value)) = line.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    value
        .trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|_| ReadError::Malformed(format!("invalid Content-Length {:?}", value.trim())))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// Reads a whole request. `Ok(None)` means the peer closed the connection
/// before sending anything.
pub async fn read_request<R>(reader: &mut R, wait: Duration) -> Result<Option<Request>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line_bounded(reader, wait).await?;
    if line.is_empty() {
        return Ok(None);
    }
    let RequestLine { method, path } = parse_request_line(&line)?;

    let mut content_length = 0;
    let mut headers = 0;
    loop {
        let header = read_line_bounded(reader, wait).await?;
        let header = header.trim();
        if header.is_empty() {
            break;
        }
        headers += 1;
        if headers > MAX_HEADERS {
            return Err(ReadError::Malformed("too many headers".into()));
        }
        if let Some(len) = parse_content_length(header)? {
            content_length = len;
        }
    }

    let body = read_exact_bounded(reader, content_length, wait).await?;
    Ok(Some(Request { method, path, body }))
}

// ── Responses ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }

    pub fn not_found() -> Self {
        Self::error(404, "not found")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = self.body.to_string();
        let head = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n",
            self.status,
            reason_phrase(self.status),
            payload.len()
        );
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(payload.as_bytes());
        bytes
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Timeout",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&response.to_bytes()).await?;
    writer.flush().await?;
    writer.shutdown().await
}

// ── Listening ───────────────────────────────────────

/// Binds a listener with `SO_REUSEADDR` so a stopped server's port can be
/// rebound at once.
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address for {host}"),
            )
        })?;
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Handles one accepted connection. The stream is dropped (closed) when
/// `handle` returns or panics.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr);
}

/// A running accept loop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits until the listening socket is closed.
    /// Connections already accepted run to completion on their own.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Accept loop ended abnormally: {e}");
        }
    }
}

/// Spawns an accept loop handing each connection to its own task.
pub fn serve<H: ConnectionHandler>(listener: TcpListener, handler: Arc<H>) -> std::io::Result<ServerHandle> {
    let local_addr = listener.local_addr()?;
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move { handler.handle(stream, peer).await });
                    }
                    Err(e) => {
                        warn!("Accept failed: {e}");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }
        drop(listener);
        debug!(%local_addr, "listener closed");
    });
    Ok(ServerHandle {
        local_addr,
        stop_tx,
        task,
    })
}
