//! Telespool configuration loading and validation.
//!
//! This crate provides:
//! - Typed settings for storage, backoff and maintenance (TOML)
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation with stable error codes
//! - Config snapshots with a content hash

pub mod resolve;
pub mod settings;
pub mod snapshot;
pub mod validate;

pub use resolve::{load_config, resolve_config, ConfigPath, ConfigSource, LoadedConfig};
pub use settings::{BackoffSettings, ConfigError, MaintenanceSettings, Settings, StorageSettings};
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_settings, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "telespool.toml";
