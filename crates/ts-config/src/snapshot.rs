//! Configuration snapshots.
//!
//! A snapshot records which settings a process ran with and where they came
//! from, so a report can be matched to the exact file that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolve::LoadedConfig;

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,

    pub schema_version: String,

    /// Path the settings were loaded from.
    #[serde(default)]
    pub config_path: Option<String>,

    pub config_source: String,

    /// SHA-256 of the file content, or of "none" for built-in defaults.
    pub config_hash: String,

    pub summary: ConfigSummary,
}

/// Key values for quick reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub storage_base: String,
    pub max_size_bytes: u64,
    pub retention_secs: u64,
    pub backoff_slot_secs: u64,
    pub backoff_max_delay_secs: u64,
    pub degraded_threshold_secs: u64,
    pub maintenance_interval_ms: u64,
}

impl ConfigSnapshot {
    pub fn new(loaded: &LoadedConfig) -> Self {
        let settings = &loaded.settings;
        ConfigSnapshot {
            timestamp: Utc::now(),
            schema_version: settings.schema_version.clone(),
            config_path: loaded
                .location
                .path
                .as_ref()
                .map(|p| p.display().to_string()),
            config_source: loaded.location.source.to_string(),
            config_hash: hash_content(loaded.content.as_deref().unwrap_or("none")),
            summary: ConfigSummary {
                storage_base: settings.storage_base().display().to_string(),
                max_size_bytes: settings.storage.max_size_bytes,
                retention_secs: settings.storage.retention_secs,
                backoff_slot_secs: settings.backoff.slot_secs,
                backoff_max_delay_secs: settings.backoff.max_delay_secs,
                degraded_threshold_secs: settings.backoff.degraded_threshold_secs,
                maintenance_interval_ms: settings.maintenance.interval_ms,
            },
        }
    }
}

/// Hex SHA-256 of a string.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{ConfigPath, ConfigSource};
    use crate::Settings;
    use std::path::PathBuf;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_content("a = 1"), hash_content("a = 1"));
        assert_ne!(hash_content("a = 1"), hash_content("a = 2"));
        assert_eq!(hash_content("").len(), 64);
    }

    #[test]
    fn test_snapshot_of_defaults() {
        let loaded = LoadedConfig {
            settings: Settings::default(),
            location: ConfigPath::default(),
            content: None,
        };
        let snap = ConfigSnapshot::new(&loaded);
        assert_eq!(snap.config_source, "builtin default");
        assert!(snap.config_path.is_none());
        assert_eq!(snap.config_hash, hash_content("none"));
        assert_eq!(snap.summary.backoff_slot_secs, 10);
    }

    #[test]
    fn test_snapshot_records_file_provenance() {
        let content = "[backoff]\nslot_secs = 3\n".to_string();
        let loaded = LoadedConfig {
            settings: Settings::default(),
            location: ConfigPath {
                path: Some(PathBuf::from("/etc/telespool.toml")),
                source: ConfigSource::CliArgument,
            },
            content: Some(content.clone()),
        };
        let snap = ConfigSnapshot::new(&loaded);
        assert_eq!(snap.config_hash, hash_content(&content));
        assert_eq!(snap.config_path.as_deref(), Some("/etc/telespool.toml"));

        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"config_source\":\"CLI argument\""));
    }
}
