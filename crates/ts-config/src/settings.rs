//! Typed settings loaded from `telespool.toml`.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validate::{validate_settings, ValidationError};

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to render settings: {0}")]
    RenderError(#[from] toml::ser::Error),

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl ConfigError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ConfigError::NotFound { .. } => 50,
            ConfigError::IoError { .. } => 51,
            ConfigError::ParseError { .. } => 52,
            ConfigError::RenderError(_) => 53,
            ConfigError::ValidationError(e) => e.code(),
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub schema_version: String,
    pub storage: StorageSettings,
    pub backoff: BackoffSettings,
    pub maintenance: MaintenanceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            storage: StorageSettings::default(),
            backoff: BackoffSettings::default(),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// Base directory. `None` means the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    pub max_size_bytes: u64,
    pub retention_secs: u64,
    pub write_timeout_secs: u64,

    /// Append a per-application hashed subdirectory to the base.
    pub namespace_by_application: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            directory: None,
            max_size_bytes: 52_428_800,
            retention_secs: 172_800,
            write_timeout_secs: 60,
            namespace_by_application: true,
        }
    }
}

impl StorageSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// `[backoff]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    pub slot_secs: u64,
    pub max_delay_secs: u64,
    /// Delay above which the transmitter enters degraded mode.
    pub degraded_threshold_secs: u64,
    /// Minimum spacing between two error-count increments.
    pub min_error_update_interval_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        BackoffSettings {
            slot_secs: 10,
            max_delay_secs: 3600,
            degraded_threshold_secs: 1800,
            min_error_update_interval_secs: 10,
        }
    }
}

impl BackoffSettings {
    pub fn slot(&self) -> Duration {
        Duration::from_secs(self.slot_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    pub fn degraded_threshold(&self) -> Duration {
        Duration::from_secs(self.degraded_threshold_secs)
    }

    pub fn min_error_update_interval(&self) -> Duration {
        Duration::from_secs(self.min_error_update_interval_secs)
    }
}

/// `[maintenance]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceSettings {
    pub interval_ms: u64,
    /// Lease taken on a stored blob while it is being retried.
    pub lease_secs: u64,
    /// Upper bound on blobs drained per pass. 0 means unlimited.
    pub max_blobs_per_pass: usize,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        MaintenanceSettings {
            interval_ms: 6000,
            lease_secs: 10,
            max_blobs_per_pass: 0,
        }
    }
}

impl MaintenanceSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl Settings {
    /// Parse settings from TOML text without validating them.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read, parse and validate a settings file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_config(path)?;
        let settings = Self::from_toml_str(&content, path)?;
        validate_settings(&settings)?;
        Ok(settings)
    }

    /// Render as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Base storage directory with the default applied.
    pub fn storage_base(&self) -> PathBuf {
        self.storage.directory.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("telespool")
        })
    }
}

pub(crate) fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::IoError {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.storage.max_size_bytes, 50 * 1024 * 1024);
        assert_eq!(s.storage.retention(), Duration::from_secs(2 * 86400));
        assert_eq!(s.storage.write_timeout(), Duration::from_secs(60));
        assert_eq!(s.backoff.slot(), Duration::from_secs(10));
        assert_eq!(s.backoff.max_delay(), Duration::from_secs(3600));
        assert_eq!(s.backoff.degraded_threshold(), Duration::from_secs(1800));
        assert_eq!(s.maintenance.interval(), Duration::from_millis(6000));
        assert_eq!(s.maintenance.lease(), Duration::from_secs(10));
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let s = Settings::from_toml_str("", Path::new("empty.toml")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let s = Settings::from_toml_str(
            "[backoff]\nslot_secs = 5\n",
            Path::new("partial.toml"),
        )
        .unwrap();
        assert_eq!(s.backoff.slot_secs, 5);
        assert_eq!(s.backoff.max_delay_secs, 3600);
        assert_eq!(s.storage, StorageSettings::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Settings::from_toml_str(
            "[storage]\nmax_size = 10\n",
            Path::new("typo.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert_eq!(err.code(), 52);
    }

    #[test]
    fn test_render_round_trips() {
        let mut s = Settings::default();
        s.storage.directory = Some(PathBuf::from("/var/spool/telespool"));
        let text = s.to_toml_string().unwrap();
        let parsed = Settings::from_toml_str(&text, Path::new("rendered.toml")).unwrap();
        assert_eq!(parsed, s);
    }

    #[test]
    fn test_storage_base_honours_override() {
        let mut s = Settings::default();
        assert!(s.storage_base().ends_with("telespool"));
        s.storage.directory = Some(PathBuf::from("/srv/spool"));
        assert_eq!(s.storage_base(), PathBuf::from("/srv/spool"));
    }
}
