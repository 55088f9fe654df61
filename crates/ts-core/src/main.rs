//! Telespool - inspect and maintain the telemetry overflow queue.
//!
//! The transmitter itself is a library; this binary works on the storage
//! directory it leaves behind:
//! - report queue size and age
//! - run a cleanup sweep
//! - list or enqueue blobs
//! - show and validate configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use ts_config::{load_config, validate_settings, ConfigError, ConfigSnapshot, LoadedConfig, Settings};
use ts_core::exit_codes::ExitCode;
use ts_core::logging::{event_names, generate_run_id, init_logging, LogConfig, LogFormat, LogLevel};
use ts_core::{TelemetryBatch, TransmitterConfig};
use ts_storage::{StorageConfig, StorageDirectory};

/// Telespool - durable telemetry spool maintenance
#[derive(Parser)]
#[command(name = "telespool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to telespool.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory to operate on (skips per-application namespacing)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report blob counts, sizes and ages
    Status,

    /// Run one cleanup pass: reclaim expired leases, evict expired and abandoned files
    Sweep,

    /// List deliverable blobs, oldest first (performs the same cleanup as sweep)
    List,

    /// Persist a newline-delimited file of records as a new blob
    Enqueue(EnqueueArgs),

    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args)]
struct EnqueueArgs {
    /// File holding one serialized record per line
    file: PathBuf,

    /// Commit the blob already leased for this many seconds
    #[arg(long, default_value_t = 0)]
    lease_secs: u64,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration and where it came from
    Show,

    /// Validate a configuration file (defaults to the resolved one)
    Validate {
        /// File to validate
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else {
        match cli.global.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    };
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));
    tracing::debug!(event = event_names::RUN_STARTED, run_id = %generate_run_id(), "telespool started");

    let exit_code = match &cli.command {
        Commands::Status => run_status(&cli.global),
        Commands::Sweep => run_sweep(&cli.global),
        Commands::List => run_list(&cli.global),
        Commands::Enqueue(args) => run_enqueue(&cli.global, args),
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => run_config_show(&cli.global),
            ConfigCommands::Validate { path } => run_config_validate(&cli.global, path.as_ref()),
        },
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Helpers
// ============================================================================

fn load(global: &GlobalOpts) -> Result<LoadedConfig, ExitCode> {
    load_config(global.config.as_deref()).map_err(|e| report_config_error(&e))
}

fn report_config_error(error: &ConfigError) -> ExitCode {
    tracing::error!(event = event_names::CONFIG_ERROR, code = error.code(), error = %error, "configuration error");
    ExitCode::from(error)
}

fn storage_config(global: &GlobalOpts, settings: &Settings) -> StorageConfig {
    let mut config = TransmitterConfig::from(settings).storage;
    if let Some(dir) = &global.dir {
        config.root_dir = dir.clone();
    }
    config
}

fn open_storage(global: &GlobalOpts) -> Result<StorageDirectory, ExitCode> {
    let loaded = load(global)?;
    let config = storage_config(global, &loaded.settings);
    tracing::debug!(
        event = event_names::CONFIG_LOADED,
        source = %loaded.location.source,
        root = %config.root_dir.display(),
        "storage opened"
    );
    Ok(StorageDirectory::new(config))
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::Clean
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize output");
            ExitCode::InternalError
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn run_status(global: &GlobalOpts) -> ExitCode {
    let storage = match open_storage(global) {
        Ok(s) => s,
        Err(code) => return code,
    };
    print_json(&serde_json::json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "storage": storage.status(),
    }))
}

fn run_sweep(global: &GlobalOpts) -> ExitCode {
    let storage = match open_storage(global) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let report = storage.sweep();
    print_json(&serde_json::json!({
        "root_dir": storage.root().display().to_string(),
        "sweep": report,
    }))
}

#[derive(Serialize)]
struct ListedBlob {
    path: String,
    id: String,
    created: String,
    size_bytes: Option<u64>,
}

fn run_list(global: &GlobalOpts) -> ExitCode {
    let storage = match open_storage(global) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let blobs: Vec<ListedBlob> = storage
        .get_blobs()
        .map(|blob| ListedBlob {
            path: blob.path().display().to_string(),
            id: blob.name().id().to_string(),
            created: blob.created().to_rfc3339(),
            size_bytes: blob.size(),
        })
        .collect();
    print_json(&blobs)
}

fn run_enqueue(global: &GlobalOpts, args: &EnqueueArgs) -> ExitCode {
    let bytes = match std::fs::read(&args.file) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(path = %args.file.display(), error = %e, "cannot read input");
            return ExitCode::from_io(&e);
        }
    };
    let batch = match TelemetryBatch::decode(&bytes) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(path = %args.file.display(), error = %e, "input is not newline-delimited records");
            return ExitCode::ArgsError;
        }
    };

    let storage = match open_storage(global) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let payload = batch.encode();
    match storage.create_blob(&payload, Duration::from_secs(args.lease_secs)) {
        Some(blob) => print_json(&serde_json::json!({
            "path": blob.path().display().to_string(),
            "records": batch.len(),
            "bytes": payload.len(),
            "leased_until": blob.lease_expiry().map(|t| t.to_rfc3339()),
        })),
        None => ExitCode::StorageError,
    }
}

fn run_config_show(global: &GlobalOpts) -> ExitCode {
    let loaded = match load(global) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let storage = storage_config(global, &loaded.settings);
    print_json(&serde_json::json!({
        "snapshot": ConfigSnapshot::new(&loaded),
        "storage_root": storage.root_dir.display().to_string(),
        "settings": loaded.settings,
    }))
}

fn run_config_validate(global: &GlobalOpts, path: Option<&PathBuf>) -> ExitCode {
    let loaded = match load_config(path.or(global.config.as_ref()).map(|p| p.as_path())) {
        Ok(l) => l,
        Err(e) => {
            let code = report_config_error(&e);
            print_json(&serde_json::json!({
                "valid": false,
                "error_code": e.code(),
                "error": e.to_string(),
            }));
            return code;
        }
    };
    // load_config validates files; defaults are checked here too.
    if let Err(e) = validate_settings(&loaded.settings) {
        return report_config_error(&ConfigError::from(e));
    }
    print_json(&serde_json::json!({
        "valid": true,
        "path": loaded.location.path.as_ref().map(|p| p.display().to_string()),
        "source": loaded.location.source.to_string(),
    }))
}
