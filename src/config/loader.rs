//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults
//! 2. System config: `/etc/mitm-addon/config.toml`
//! 3. User config: `~/.config/mitm-addon/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Each layer only overrides the values it sets.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, ExportConfig, InjectorConfig};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/mitm-addon/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "mitm-addon";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Path of the user configuration file.
    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system and user files are skipped. A file given with
    /// `--config` must exist. Invalid TOML is an error.
    pub fn load(&self, cli: &Cli) -> ConfigResult<Config> {
        let mut config = Config::defaults();
        debug!("Loaded embedded default configuration");

        for path in [&self.system_path, &self.user_path] {
            if let Some(layer) = Self::load_file(path)? {
                config.merge(layer);
                debug!("Loaded config from {:?}", path);
            } else {
                debug!("No config found at {:?}", path);
            }
        }

        if let Some(ref cli_config_path) = cli.config {
            match Self::load_file(cli_config_path)? {
                Some(layer) => {
                    config.merge(layer);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        config.merge(Self::cli_layer(cli));
        config.validate()?;

        Ok(config)
    }

    /// The config values set by command-line flags.
    fn cli_layer(cli: &Cli) -> Config {
        Config {
            export: ExportConfig {
                channel: cli.channel.clone(),
                truncate_payloads: cli.truncate_payloads.then_some(true),
                ..Default::default()
            },
            injector: InjectorConfig {
                scripts_dir: cli.scripts_dir.clone(),
                enabled: cli.no_inject.then_some(false),
            },
            ..Default::default()
        }
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(path: &Path) -> ConfigResult<Option<Config>> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
