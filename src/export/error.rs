//! Export error types.

use std::io;
use thiserror::Error;

/// Errors on the control channel.
#[derive(Debug, Error)]
pub enum ExportError {
    /// I/O error on the channel.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The host closed its end of the channel.
    #[error("Control channel closed by peer")]
    PeerClosed,

    /// Connecting to the host failed.
    #[error("Failed to connect to control channel {addr}: {source}")]
    Connect {
        /// Address that was tried.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A frame header could not be parsed.
    #[error("Malformed frame header: {0}")]
    MalformedHeader(String),

    /// A frame header named a kind this crate does not know.
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),
}

impl ExportError {
    /// Classify a write error, folding the "other side went away" kinds into
    /// [`ExportError::PeerClosed`].
    pub fn from_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WriteZero => ExportError::PeerClosed,
            _ => ExportError::Io(err),
        }
    }

    /// Whether the error means the host closed the channel.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, ExportError::PeerClosed)
    }
}

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;
