//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths → defaults.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::settings::{read_config, ConfigError, Settings};
use crate::validate::validate_settings;
use crate::CONFIG_FILENAME;

/// Where the configuration came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Resolved config file location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPath {
    /// Path to telespool.toml, or None when using defaults.
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Environment variable naming a config file directly.
pub const ENV_CONFIG_PATH: &str = "TELESPOOL_CONFIG";

/// Environment variable naming a directory holding telespool.toml.
pub const ENV_CONFIG_DIR: &str = "TELESPOOL_CONFIG_DIR";

/// Application name for XDG directories.
const APP_NAME: &str = "telespool";

/// Resolve the config file path.
///
/// 1. Explicit CLI path. Returned even if missing so loading reports it.
/// 2. `TELESPOOL_CONFIG` (direct path)
/// 3. `TELESPOOL_CONFIG_DIR` + `telespool.toml`
/// 4. XDG config directory (`~/.config/telespool/telespool.toml`)
/// 5. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigPath {
    if let Some(path) = cli_path {
        return ConfigPath {
            path: Some(path.to_path_buf()),
            source: ConfigSource::CliArgument,
        };
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return ConfigPath {
                path: Some(path),
                source: ConfigSource::Environment,
            };
        }
        debug!(path = %path.display(), "{} points at a missing file", ENV_CONFIG_PATH);
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return ConfigPath {
                path: Some(path),
                source: ConfigSource::Environment,
            };
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return ConfigPath {
                path: Some(path),
                source: ConfigSource::XdgConfig,
            };
        }
    }

    ConfigPath::default()
}

/// Get the XDG config directory for telespool.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Settings plus the provenance needed for a snapshot.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: Settings,
    pub location: ConfigPath,
    /// Raw file content, if a file was read.
    pub content: Option<String>,
}

/// Resolve, read, parse and validate in one step.
pub fn load_config(cli_path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let location = resolve_config(cli_path);
    let Some(path) = location.path.as_deref() else {
        return Ok(LoadedConfig {
            settings: Settings::default(),
            location,
            content: None,
        });
    };

    let content = read_config(path)?;
    let settings = Settings::from_toml_str(&content, path)?;
    validate_settings(&settings)?;
    debug!(path = %path.display(), source = %location.source, "configuration loaded");

    Ok(LoadedConfig {
        settings,
        location,
        content: Some(content),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::CliArgument), "CLI argument");
        assert_eq!(
            format!("{}", ConfigSource::Environment),
            "environment variable"
        );
        assert_eq!(format!("{}", ConfigSource::XdgConfig), "XDG config");
        assert_eq!(
            format!("{}", ConfigSource::BuiltinDefault),
            "builtin default"
        );
    }

    #[test]
    fn test_cli_path_wins_even_when_missing() {
        let resolved = resolve_config(Some(Path::new("/nonexistent/telespool.toml")));
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert!(matches!(
            load_config(Some(Path::new("/nonexistent/telespool.toml"))),
            Err(ConfigError::NotFound { .. })
        ));
    }
}
