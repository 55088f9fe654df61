//! Exit codes for the telespool CLI.
//!
//! Exit code ranges:
//! - 0: success
//! - 10-19: user/environment errors (recoverable by user action)
//! - 20-29: internal errors (bugs, should be reported)

use ts_config::ConfigError;

/// Exit codes for telespool commands.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Clean = 0,

    /// Invalid arguments or configuration
    ArgsError = 10,

    /// Input file not found or unreadable
    InputError = 11,

    /// Permission denied
    PermissionError = 12,

    /// Storage refused the write (quota or I/O)
    StorageError = 13,

    /// Internal error (bug - please report)
    InternalError = 20,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// User/environment error (codes 10-19).
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    /// Internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Error code name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::InputError => "ERR_INPUT",
            ExitCode::PermissionError => "ERR_PERMISSION",
            ExitCode::StorageError => "ERR_STORAGE",
            ExitCode::InternalError => "ERR_INTERNAL",
        }
    }

    /// Exit code for an I/O failure, distinguishing permission problems.
    pub fn from_io(error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::PermissionDenied => ExitCode::PermissionError,
            std::io::ErrorKind::NotFound => ExitCode::InputError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<&ConfigError> for ExitCode {
    fn from(error: &ConfigError) -> Self {
        match error {
            ConfigError::IoError { source, .. } => ExitCode::from_io(source),
            ConfigError::RenderError(_) => ExitCode::InternalError,
            ConfigError::NotFound { .. }
            | ConfigError::ParseError { .. }
            | ConfigError::ValidationError(_) => ExitCode::ArgsError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
