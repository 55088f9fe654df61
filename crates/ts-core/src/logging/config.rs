//! Logging configuration for the `telespool` binary.
//!
//! Sources, lowest precedence first:
//! - built-in defaults (human output at `info`)
//! - `RUST_LOG`, only to pick a level when `TELESPOOL_LOG` is unset
//! - `TELESPOOL_LOG` and `TELESPOOL_LOG_FORMAT`
//! - `-v`/`-q` and `--log-format`

/// Environment variable holding the log level.
pub const ENV_LOG_LEVEL: &str = "TELESPOOL_LOG";

/// Environment variable holding the log format.
pub const ENV_LOG_FORMAT: &str = "TELESPOOL_LOG_FORMAT";

/// Shape of the lines written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text, colored when stderr is a terminal.
    #[default]
    Human,
    /// One flattened JSON object per event, for log shippers.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {} (expected human or jsonl)", s)),
        }
    }
}

/// Verbosity applied to every telespool crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    /// Per-blob and per-attempt detail.
    Debug,
    /// Passes, sweeps and backoff transitions.
    #[default]
    Info,
    /// Data loss and storage failures.
    Warn,
    Error,
    Off,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Off,
    ];

    /// Directive spelling understood by `EnvFilter`.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }

    /// Most verbose level named anywhere in a `RUST_LOG` directive list.
    fn most_verbose_in(directives: &str) -> Option<LogLevel> {
        directives
            .split(',')
            .filter_map(|d| {
                let level = d.rsplit('=').next().unwrap_or(d).trim();
                level.parse::<LogLevel>().ok()
            })
            .min()
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "warning" {
            return Ok(LogLevel::Warn);
        }
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == lower)
            .ok_or_else(|| format!("unknown log level: {}", s))
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Prefix human lines with a timestamp.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Resolve from the process environment, then apply CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), cli_level, cli_format)
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let mut config = LogConfig::default();

        let env_level = match lookup(ENV_LOG_LEVEL) {
            Some(val) => val.parse().ok(),
            None => lookup("RUST_LOG").and_then(|val| LogLevel::most_verbose_in(&val)),
        };
        if let Some(level) = cli_level.or(env_level) {
            config.level = level;
        }

        let env_format = lookup(ENV_LOG_FORMAT).and_then(|val| val.parse().ok());
        if let Some(format) = cli_format.or(env_format) {
            config.format = format;
        }

        config
    }
}
