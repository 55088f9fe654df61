//! Structured logging for telespool.
//!
//! - stdout is reserved for command payloads (JSON reports)
//! - stderr receives all log output, human or JSONL
//! - Pipeline events carry an `event` field from [`event_names`]

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Standard event names used in logging.
pub mod event_names {
    // Live path
    pub const SUBMIT_ACCEPTED: &str = "submit.accepted";
    pub const SUBMIT_PERSISTED: &str = "submit.persisted";
    pub const SUBMIT_DROPPED: &str = "submit.dropped";
    pub const SUBMIT_CANCELLED: &str = "submit.cancelled";
    pub const SUBMIT_SHORT_CIRCUIT: &str = "submit.short_circuit";

    // Backoff
    pub const BACKOFF_ENGAGED: &str = "backoff.engaged";
    pub const BACKOFF_CLEARED: &str = "backoff.cleared";

    // Maintenance
    pub const MAINTENANCE_PASS: &str = "maintenance.pass";
    pub const DRAIN_FINISHED: &str = "drain.finished";

    // CLI
    pub const RUN_STARTED: &str = "run.started";
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";
}

/// Crates whose events the default filter lets through.
const LOG_TARGETS: [&str; 5] = ["telespool", "ts_core", "ts_storage", "ts_config", "ts_common"];

/// Default filter directive string for `level`.
pub fn default_directives(level: LogLevel) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. `RUST_LOG`,
/// when set, replaces the level-derived filter.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .init();
            }
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .flatten_event(true);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .init();
        }
    }
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}
