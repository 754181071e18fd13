//! Error types for script loading and content injection.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading userscript files.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path of the script file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The script file is not valid UTF-8.
    #[error("{path} is not valid UTF-8")]
    InvalidUtf8 {
        /// Path of the script file.
        path: PathBuf,
    },

    /// The scripts directory could not be created or listed.
    #[error("Failed to scan scripts directory {path}: {source}")]
    Directory {
        /// Path of the scripts directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for script loading.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Errors that abort injection into a single response.
///
/// None of these are fatal: the response is forwarded without its body being
/// rewritten.
#[derive(Debug, Error)]
pub enum InjectError {
    /// The parsed document has no `<body>` element.
    #[error("HTML document has no body element")]
    NoBody,

    /// The body is compressed or otherwise encoded and cannot be rewritten.
    #[error("Unsupported content encoding: {0}")]
    EncodedBody(String),

    /// The body is not UTF-8 and would be corrupted by re-serialization.
    #[error("Body is not UTF-8 (charset {0})")]
    NonUtf8Body(String),
}

/// Result type for injection.
pub type InjectResult<T> = Result<T, InjectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_display() {
        let err = ScriptError::Read {
            path: PathBuf::from("/scripts/a.js"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/scripts/a.js"));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_encoded_body_display() {
        let err = InjectError::EncodedBody("gzip".to_string());
        assert!(err.to_string().contains("gzip"));
    }
}
