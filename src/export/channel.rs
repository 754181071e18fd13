//! Control channel endpoints.
//!
//! The host listens on either a local TCP port or a Unix socket:
//!
//! - `127.0.0.1:4567` connects over TCP with Nagle disabled
//! - `unix:/run/user/1000/host.sock` connects to a Unix socket
//!
//! The connection is made once, before the proxy starts, and is written
//! synchronously for the rest of the session.

use std::fmt;
use std::io::Write;
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;

use super::error::{ExportError, ExportResult};

/// Prefix selecting a Unix socket endpoint.
pub const UNIX_PREFIX: &str = "unix:";

/// Address of the host end of the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAddr {
    /// `host:port` of a TCP listener.
    Tcp(String),
    /// Path of a Unix socket.
    Unix(PathBuf),
}

impl FromStr for ChannelAddr {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix(UNIX_PREFIX) {
            if path.is_empty() {
                return Err(ExportError::Connect {
                    addr: s.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "empty socket path",
                    ),
                });
            }
            return Ok(ChannelAddr::Unix(PathBuf::from(path)));
        }

        if !s.contains(':') {
            return Err(ExportError::Connect {
                addr: s.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "expected host:port or unix:<path>",
                ),
            });
        }
        Ok(ChannelAddr::Tcp(s.to_string()))
    }
}

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddr::Tcp(addr) => f.write_str(addr),
            ChannelAddr::Unix(path) => write!(f, "{}{}", UNIX_PREFIX, path.display()),
        }
    }
}

/// Connect to the host and return the writable end of the channel.
pub fn connect(addr: &ChannelAddr) -> ExportResult<Box<dyn Write + Send>> {
    let connect_err = |source| ExportError::Connect {
        addr: addr.to_string(),
        source,
    };

    let writer: Box<dyn Write + Send> = match addr {
        ChannelAddr::Tcp(target) => {
            let stream = TcpStream::connect(target.as_str()).map_err(connect_err)?;
            stream.set_nodelay(true).map_err(connect_err)?;
            Box::new(stream)
        }
        ChannelAddr::Unix(path) => Box::new(UnixStream::connect(path).map_err(connect_err)?),
    };

    info!("Connected to control channel at {}", addr);
    Ok(writer)
}
