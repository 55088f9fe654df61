//! Telespool overflow storage.
//!
//! This crate provides:
//! - Blob naming with filename-encoded lease state
//! - Staged writes committed by atomic rename
//! - Directory enumeration that reclaims expired leases and evicts
//!   abandoned or expired files as it goes
//! - Quota accounting and a status report
//!
//! Coordination between processes sharing a directory uses rename only; no
//! in-memory lock is held across any of these operations.

pub mod blob;
pub mod directory;
pub mod error;
pub mod layout;
pub mod naming;

pub use blob::Blob;
pub use directory::{Blobs, StorageConfig, StorageDirectory, StorageStatus, SweepReport};
pub use error::StorageError;
pub use layout::{application_subdirectory, default_storage_base};
pub use naming::{BlobName, BlobState, NameError};

/// Default quota for the storage directory (50 MiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// Default retention period in seconds (2 days).
pub const DEFAULT_RETENTION_SECS: u64 = 2 * 24 * 3600;

/// Default staged-write timeout in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 60;

/// Default maintenance interval in milliseconds.
pub const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 6000;
