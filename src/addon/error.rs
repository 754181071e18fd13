//! Addon setup errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::export::ExportError;

/// Errors raised while building a [`ProxyAddon`](super::ProxyAddon).
///
/// Once built, the addon never fails: hook errors are contained.
#[derive(Debug, Error)]
pub enum AddonError {
    /// Neither a writer nor a channel address was configured.
    #[error("No control channel configured (set export.channel or pass --channel)")]
    NoChannel,

    /// The control channel could not be opened.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// The configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for addon setup.
pub type AddonResult<T> = Result<T, AddonError>;
