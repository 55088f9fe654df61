//! Construction-time errors.
//!
//! Nothing here is returned from `submit`: delivery and storage failures are
//! absorbed into the accepted count and the diagnostic channel.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransmitError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn maintenance thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl TransmitError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            TransmitError::InvalidConfig(_) => 30,
            TransmitError::Spawn(_) => 31,
        }
    }
}
