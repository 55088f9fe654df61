//! A single persisted payload.
//!
//! A `Blob` is a handle: a path plus the parsed name. It does not hold the
//! file open. Any operation may find the file gone because another consumer
//! renamed or deleted it first; that is reported as `None`/`false`, never as
//! an error.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::naming::BlobName;

/// Handle to a committed or leased blob file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    path: PathBuf,
    name: BlobName,
}

impl Blob {
    /// Handle for an existing file. Fails if the file name does not parse.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidPath(path.clone()))?;
        let name = BlobName::parse(file_name)?;
        Ok(Blob { path, name })
    }

    pub(crate) fn from_parts(dir: &Path, name: BlobName) -> Self {
        Blob {
            path: dir.join(name.file_name()),
            name,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &BlobName {
        &self.name
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.name.created()
    }

    pub fn lease_expiry(&self) -> Option<DateTime<Utc>> {
        self.name.lease_expiry()
    }

    /// Size on disk, if the file still exists.
    pub fn size(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }

    /// Read the full payload.
    pub fn read(&self) -> Option<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "blob read failed");
                None
            }
        }
    }

    /// Claim the blob for `period`, returning the renamed handle.
    ///
    /// A leased blob stays invisible to enumeration until the lease expires.
    /// Re-leasing an already leased blob replaces its expiry. `None` means
    /// the rename failed, usually because another consumer claimed or
    /// deleted it first; this handle should then be treated as stale.
    pub fn lease(&self, period: Duration) -> Option<Blob> {
        self.lease_at(Utc::now(), period)
    }

    /// Lease relative to an explicit clock reading.
    pub fn lease_at(&self, now: DateTime<Utc>, period: Duration) -> Option<Blob> {
        let until = add_duration(now, period);
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let leased = Blob::from_parts(dir, self.name.leased(until));

        match fs::rename(&self.path, &leased.path) {
            Ok(()) => {
                debug!(
                    from = %self.path.display(),
                    to = %leased.path.display(),
                    "blob leased"
                );
                Some(leased)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "lease lost: blob already claimed");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "blob lease rename failed");
                None
            }
        }
    }

    /// Delete the file. Returns `true` if this call removed it.
    pub fn delete(&self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "blob deleted");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "blob delete failed");
                false
            }
        }
    }

    /// Stage `payload` under a `.tmp` name and rename it into place.
    ///
    /// When `lease` is non-zero the committed name already carries the lease,
    /// so the blob never becomes visible to other consumers before it expires.
    pub(crate) fn write_new(
        dir: &Path,
        payload: &[u8],
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Blob, StorageError> {
        let name = BlobName::generate(now);
        let staged = dir.join(name.staged().file_name());

        let final_name = if lease.is_zero() {
            name
        } else {
            name.leased(add_duration(now, lease))
        };
        let blob = Blob::from_parts(dir, final_name);

        if let Err(e) = write_staged(&staged, payload) {
            remove_quietly(&staged);
            return Err(e);
        }

        if let Err(e) = atomic_rename(&staged, &blob.path) {
            remove_quietly(&staged);
            return Err(e);
        }

        Ok(blob)
    }
}

fn write_staged(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    let mut file = File::create(path).map_err(|e| StorageError::io(path, e))?;
    file.write_all(payload)
        .map_err(|e| StorageError::io(path, e))?;
    file.sync_all().map_err(|e| StorageError::io(path, e))?;
    Ok(())
}

/// Rename a staged file into its final name.
pub fn atomic_rename(from: &Path, to: &Path) -> Result<(), StorageError> {
    fs::rename(from, to).map_err(|e| StorageError::io(from, e))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "staged file cleanup failed");
        }
    }
}

/// `now + period`, saturating far in the future instead of overflowing.
pub(crate) fn add_duration(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now - period`, saturating at the minimum representable instant.
pub(crate) fn sub_duration(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX);
    now.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
