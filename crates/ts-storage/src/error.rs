//! Storage error type.
//!
//! These errors stay inside the crate's public "never fails" surface: every
//! public operation converts them into a log line, a diagnostic event, and a
//! `None`/`false` return.

use std::path::PathBuf;

use thiserror::Error;

use crate::naming::NameError;

/// Errors from storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid blob name: {0}")]
    Name(#[from] NameError),

    #[error("quota exceeded: {used} + {requested} bytes > {limit} bytes")]
    QuotaExceeded { used: u64, requested: u64, limit: u64 },

    #[error("path has no file name: {0}")]
    InvalidPath(PathBuf),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
