//! Configuration schema definitions.
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [export]
//! channel = "127.0.0.1:4567"   # or "unix:/path/to/host.sock"
//! truncate_payloads = false
//! dump_client = true
//! dump_keylog = false
//!
//! [injector]
//! enabled = true
//! scripts_dir = "~/js_injector"
//! ```
//!
//! Every scalar is optional so that a later layer only overrides what it sets.
//! Use [`Config::export_settings`] and [`InjectorConfig::resolved_scripts_dir`]
//! to read the effective values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::{ConfigError, ConfigResult};

/// Name of the default scripts directory under the home directory.
pub const DEFAULT_SCRIPTS_DIR_NAME: &str = "js_injector";

/// Accepted `general.log_level` values.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Event export settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Script injection settings.
    #[serde(default)]
    pub injector: InjectorConfig,
}

impl Config {
    /// The values used when no file sets them.
    pub fn defaults() -> Self {
        Self {
            general: GeneralConfig {
                log_level: Some("warn".to_string()),
            },
            export: ExportConfig {
                channel: None,
                truncate_payloads: Some(false),
                dump_client: Some(true),
                dump_keylog: Some(false),
            },
            injector: InjectorConfig {
                enabled: Some(true),
                scripts_dir: None,
            },
        }
    }

    /// Render the configuration as TOML, omitting unset values.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config into this one. Values set in `other` win.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.export.merge(other.export);
        self.injector.merge(other.injector);
    }

    /// Check values that TOML typing alone cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref level) = self.general.log_level
            && !LOG_LEVELS.contains(&level.as_str())
        {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_string(),
                message: format!("expected one of {:?}, got {:?}", LOG_LEVELS, level),
            });
        }

        if let Some(ref channel) = self.export.channel
            && channel.trim().is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "export.channel".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Effective export flags.
    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            truncate_payloads: self.export.truncate_payloads.unwrap_or(false),
            dump_client: self.export.dump_client.unwrap_or(true),
            dump_keylog: self.export.dump_keylog.unwrap_or(false),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
    }
}

/// Event export settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExportConfig {
    /// Host endpoint: `host:port` or `unix:<path>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Export at most one capped chunk per direction and flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_payloads: Option<bool>,

    /// Identify flows by client port (SOCKS5) instead of the proxy's
    /// server-side local port (transparent mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_client: Option<bool>,

    /// Forward TLS key material as `secret` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_keylog: Option<bool>,
}

impl ExportConfig {
    fn merge(&mut self, other: ExportConfig) {
        if other.channel.is_some() {
            self.channel = other.channel;
        }
        if other.truncate_payloads.is_some() {
            self.truncate_payloads = other.truncate_payloads;
        }
        if other.dump_client.is_some() {
            self.dump_client = other.dump_client;
        }
        if other.dump_keylog.is_some() {
            self.dump_keylog = other.dump_keylog;
        }
    }
}

/// Resolved export flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSettings {
    /// See [`ExportConfig::truncate_payloads`].
    pub truncate_payloads: bool,
    /// See [`ExportConfig::dump_client`].
    pub dump_client: bool,
    /// See [`ExportConfig::dump_keylog`].
    pub dump_keylog: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Config::defaults().export_settings()
    }
}

/// Script injection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InjectorConfig {
    /// Whether HTML responses are rewritten at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Directory holding the userscripts. A leading `~/` is the home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts_dir: Option<PathBuf>,
}

impl InjectorConfig {
    fn merge(&mut self, other: InjectorConfig) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.scripts_dir.is_some() {
            self.scripts_dir = other.scripts_dir;
        }
    }

    /// Whether injection is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Scripts directory to use, or `None` when injection is disabled.
    ///
    /// Defaults to `<home>/js_injector`.
    pub fn resolved_scripts_dir(&self) -> Result<Option<PathBuf>, ConfigError> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let dir = match self.scripts_dir {
            Some(ref dir) => match dir.strip_prefix("~") {
                Ok(rest) => dirs::home_dir()
                    .ok_or(ConfigError::NoHomeDirectory)?
                    .join(rest),
                Err(_) => dir.clone(),
            },
            None => dirs::home_dir()
                .ok_or(ConfigError::NoHomeDirectory)?
                .join(DEFAULT_SCRIPTS_DIR_NAME),
        };

        Ok(Some(dir))
    }
}
