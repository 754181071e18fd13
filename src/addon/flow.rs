//! Values handed over by the proxy engine.
//!
//! The engine owns connections and protocol parsing. These types are the
//! snapshot of a flow it passes to the hooks, with the export bookkeeping
//! ([`FlowState`]) carried inside each flow.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use hyper::http::uri::Authority;
use hyper::{Request, Response, Uri, header};
use uuid::Uuid;

use crate::export::{FlowState, now_millis};
use crate::inject::RequestTarget;

/// Addresses of the two legs of an intercepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Peer address of the client leg.
    pub client_addr: SocketAddr,
    /// Local address of the proxy's server-side socket, once connected.
    pub server_local_addr: Option<SocketAddr>,
    /// Address of the upstream server, once known.
    pub server_addr: Option<SocketAddr>,
    /// Whether the client leg is TLS.
    pub tls: bool,
}

impl ConnectionInfo {
    /// Connection with only the client leg known.
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr,
            server_local_addr: None,
            server_addr: None,
            tls: false,
        }
    }

    /// Port that identifies the connection to the host.
    ///
    /// With `dump_client` the client peer port is used (the host sees the
    /// client's connection through SOCKS5). Otherwise the local port of the
    /// proxy's server-side socket is used, `0` if not connected yet.
    pub fn endpoint_port(&self, dump_client: bool) -> u16 {
        if dump_client {
            self.client_addr.port()
        } else {
            self.server_local_addr.map(|a| a.port()).unwrap_or(0)
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.server_addr {
            Some(server) => write!(f, "{} -> {}", self.client_addr, server),
            None => write!(f, "{} -> ?", self.client_addr),
        }
    }
}

/// Scheme, host and path of an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTarget {
    /// `http` or `https`.
    pub scheme: String,
    /// Host without port.
    pub host: String,
    /// Path and query, starting with `/`.
    pub path: String,
}

impl FlowTarget {
    /// Split an absolute URL. Returns `None` without a scheme or host.
    pub fn parse_url(url: &str) -> Option<Self> {
        let uri: Uri = url.parse().ok()?;

        Some(Self {
            scheme: uri.scheme_str()?.to_ascii_lowercase(),
            host: uri.host()?.to_string(),
            path: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        })
    }

    /// Borrow as the matcher input.
    pub fn as_request_target(&self) -> RequestTarget<'_> {
        RequestTarget {
            scheme: &self.scheme,
            host: &self.host,
            path: &self.path,
        }
    }
}

impl fmt::Display for FlowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// A message on an upgraded WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketMessage {
    /// Sent by the client.
    pub from_client: bool,
    /// Message payload.
    pub content: Bytes,
    /// When the message was seen.
    pub timestamp_ms: u64,
}

/// WebSocket state of an HTTP flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSocketData {
    /// Messages so far, oldest first.
    pub messages: Vec<WebSocketMessage>,
}

/// An HTTP request/response exchange.
#[derive(Debug)]
pub struct HttpFlow {
    /// Flow identifier.
    pub id: Uuid,
    /// Connection the flow runs on.
    pub conn: ConnectionInfo,
    /// The request.
    pub request: Request<Bytes>,
    /// The response, once received.
    pub response: Option<Response<Bytes>>,
    /// WebSocket data if the connection was upgraded.
    pub websocket: Option<WebSocketData>,
    /// Error text if the flow failed.
    pub error: Option<String>,
    /// When the request was received.
    pub request_timestamp_ms: u64,
    /// When the response was received.
    pub response_timestamp_ms: Option<u64>,
    /// Export bookkeeping.
    pub state: FlowState,
}

impl HttpFlow {
    /// New flow for a request just received.
    pub fn new(conn: ConnectionInfo, request: Request<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conn,
            request,
            response: None,
            websocket: None,
            error: None,
            request_timestamp_ms: now_millis(),
            response_timestamp_ms: None,
            state: FlowState::new(),
        }
    }

    /// Attach the response.
    pub fn set_response(&mut self, response: Response<Bytes>) {
        self.response = Some(response);
        self.response_timestamp_ms = Some(now_millis());
    }

    /// Scheme, host and path of the request.
    ///
    /// Taken from the request URI when it is absolute, otherwise from the
    /// `Host` header and the connection's TLS flag.
    pub fn target(&self) -> FlowTarget {
        let uri = self.request.uri();

        let scheme = uri
            .scheme_str()
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| if self.conn.tls { "https" } else { "http" }.to_string());

        let host = match uri.host() {
            Some(host) => host.to_string(),
            None => self
                .request
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<Authority>().ok())
                .map(|a| a.host().to_string())
                .unwrap_or_default(),
        };

        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        FlowTarget { scheme, host, path }
    }
}

/// One chunk of raw TCP data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpMessage {
    /// Sent by the client.
    pub from_client: bool,
    /// Data.
    pub content: Bytes,
    /// When the data was seen.
    pub timestamp_ms: u64,
}

/// A raw TCP connection.
#[derive(Debug)]
pub struct TcpFlow {
    /// Flow identifier.
    pub id: Uuid,
    /// Connection the flow runs on.
    pub conn: ConnectionInfo,
    /// Messages so far, oldest first.
    pub messages: Vec<TcpMessage>,
    /// Error text if the connection failed.
    pub error: Option<String>,
    /// Export bookkeeping.
    pub state: FlowState,
}

impl TcpFlow {
    /// New flow for a connection.
    pub fn new(conn: ConnectionInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            conn,
            messages: Vec::new(),
            error: None,
            state: FlowState::new(),
        }
    }
}

/// A failed TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFailure {
    /// Connection on which the handshake failed.
    pub conn: ConnectionInfo,
    /// Error text.
    pub error: String,
    /// When the failure happened.
    pub timestamp_ms: u64,
}

/// Severity of an engine log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug detail.
    Debug,
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
    /// Needs the user's attention.
    Alert,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Alert => write!(f, "alert"),
        }
    }
}

/// A log line produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
}

impl LogEntry {
    /// Create an entry.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}
