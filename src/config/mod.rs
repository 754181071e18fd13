//! Configuration system for mitm-addon.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults
//! 2. System config: `/etc/mitm-addon/config.toml`
//! 3. User config: `~/.config/mitm-addon/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Missing system and user files are fine. Every value is a scalar, and a
//! layer overrides only the values it sets.

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{
    Config, DEFAULT_SCRIPTS_DIR_NAME, ExportConfig, ExportSettings, GeneralConfig,
    InjectorConfig,
};
