//! Control-channel wire format.
//!
//! Every event is one frame: an ASCII header line followed by the raw payload.
//!
//! ```text
//! <timestamp_ms>:<port>:<kind>:<payload_len>\n
//! <payload_len bytes of payload>
//! ```
//!
//! `port` is the endpoint port of the flow, or `0` for events that have none
//! (`running`, `secret`, `log`). The payload is written as-is, so it may
//! contain newlines and colons; readers must use `payload_len`.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use bytes::Bytes;
use chrono::Utc;

use super::error::{ExportError, ExportResult};

/// Type of an exported event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// The proxy is up.
    Running,
    /// TLS handshake with client or server failed.
    TlsError,
    /// HTTP flow failed.
    HttpError,
    /// HTTP request.
    HttpRequest,
    /// HTTP response.
    HttpResponse,
    /// Raw TCP data sent by the client.
    TcpClientMessage,
    /// Raw TCP data sent by the server.
    TcpServerMessage,
    /// Raw TCP connection failed.
    TcpError,
    /// WebSocket message sent by the client.
    WsClientMessage,
    /// WebSocket message sent by the server.
    WsServerMessage,
    /// Further payloads of a flow are suppressed.
    Truncated,
    /// TLS key log line.
    Secret,
    /// Proxy log line.
    Log,
    /// Names of the scripts injected into the next response.
    JsInject,
}

impl MessageKind {
    /// Every kind, in wire-table order.
    pub const ALL: [MessageKind; 14] = [
        MessageKind::Running,
        MessageKind::TlsError,
        MessageKind::HttpError,
        MessageKind::HttpRequest,
        MessageKind::HttpResponse,
        MessageKind::TcpClientMessage,
        MessageKind::TcpServerMessage,
        MessageKind::TcpError,
        MessageKind::WsClientMessage,
        MessageKind::WsServerMessage,
        MessageKind::Truncated,
        MessageKind::Secret,
        MessageKind::Log,
        MessageKind::JsInject,
    ];

    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Running => "running",
            MessageKind::TlsError => "tls_err",
            MessageKind::HttpError => "http_err",
            MessageKind::HttpRequest => "http_req",
            MessageKind::HttpResponse => "http_rep",
            MessageKind::TcpClientMessage => "tcp_climsg",
            MessageKind::TcpServerMessage => "tcp_srvmsg",
            MessageKind::TcpError => "tcp_err",
            MessageKind::WsClientMessage => "ws_climsg",
            MessageKind::WsServerMessage => "ws_srvmsg",
            MessageKind::Truncated => "trunc",
            MessageKind::Secret => "secret",
            MessageKind::Log => "log",
            MessageKind::JsInject => "js_inject",
        }
    }

    /// TCP message kind for the sending side.
    pub fn tcp_message(from_client: bool) -> Self {
        if from_client {
            MessageKind::TcpClientMessage
        } else {
            MessageKind::TcpServerMessage
        }
    }

    /// WebSocket message kind for the sending side.
    pub fn ws_message(from_client: bool) -> Self {
        if from_client {
            MessageKind::WsClientMessage
        } else {
            MessageKind::WsServerMessage
        }
    }

    /// Whether the payload is UTF-8 text rather than raw bytes.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            MessageKind::TlsError
                | MessageKind::HttpError
                | MessageKind::TcpError
                | MessageKind::Log
                | MessageKind::JsInject
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ExportError::UnknownKind(s.to_string()))
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Render a frame header line, including its trailing newline.
pub fn encode_header(timestamp_ms: u64, port: u16, kind: MessageKind, payload_len: usize) -> String {
    format!("{}:{}:{}:{}\n", timestamp_ms, port, kind, payload_len)
}

/// Write one frame: the header, then the payload, then flush.
pub fn write_frame<W: Write + ?Sized>(
    writer: &mut W,
    timestamp_ms: u64,
    port: u16,
    kind: MessageKind,
    payload: &[u8],
) -> io::Result<()> {
    writer.write_all(encode_header(timestamp_ms, port, kind, payload.len()).as_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Endpoint port, `0` when not applicable.
    pub port: u16,
    /// Event kind.
    pub kind: MessageKind,
    /// Raw payload.
    pub payload: Bytes,
}

impl Frame {
    /// Payload as text, with invalid UTF-8 replaced.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Read the next frame.
///
/// Returns `Ok(None)` on a clean end of stream. A stream that ends inside a
/// frame is an I/O error (`UnexpectedEof`).
pub fn read_frame<R: BufRead + ?Sized>(reader: &mut R) -> ExportResult<Option<Frame>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.pop() != Some(b'\n') {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }

    let header = std::str::from_utf8(&line)
        .map_err(|_| ExportError::MalformedHeader(String::from_utf8_lossy(&line).into_owned()))?;
    let malformed = || ExportError::MalformedHeader(header.to_string());

    let mut fields = header.splitn(4, ':');
    let timestamp_ms = fields
        .next()
        .and_then(|f| f.parse::<u64>().ok())
        .ok_or_else(malformed)?;
    let port = fields
        .next()
        .and_then(|f| f.parse::<u16>().ok())
        .ok_or_else(malformed)?;
    let kind: MessageKind = fields.next().ok_or_else(malformed)?.parse()?;
    let len = fields
        .next()
        .and_then(|f| f.parse::<usize>().ok())
        .ok_or_else(malformed)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    Ok(Some(Frame {
        timestamp_ms,
        port,
        kind,
        payload: Bytes::from(payload),
    }))
}

/// Read frames until end of stream.
pub fn read_all_frames<R: BufRead + ?Sized>(reader: &mut R) -> ExportResult<Vec<Frame>> {
    let mut frames = Vec::new();
    while let Some(frame) = read_frame(reader)? {
        frames.push(frame);
    }
    Ok(frames)
}
