//! Storage directory: the on-disk overflow queue.
//!
//! The directory is shared by every process that resolves to the same path.
//! Its only mutation primitive is `rename` (plus create/delete of files this
//! process owns), so there is no lock file and no index to corrupt.
//!
//! Enumeration doubles as maintenance. Walking the directory with
//! [`StorageDirectory::get_blobs`]:
//! - deletes staged `.tmp` files older than the write timeout
//! - renames expired `.lock` files back to their committed name
//! - deletes blobs older than the retention period, leased or not
//! - yields only committed, unexpired blobs, oldest first
//!
//! Every public operation swallows I/O errors: it logs them, reports them on
//! the diagnostic channel, and degrades to `None`/`false`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ts_common::{DiagnosticEvent, DiagnosticSink, DropReason, TracingSink};

use crate::blob::{sub_duration, Blob};
use crate::error::StorageError;
use crate::naming::{BlobName, BlobState};

/// Configuration for a storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding the blobs. Created on demand.
    pub root_dir: PathBuf,

    /// Upper bound on the directory's total size in bytes.
    pub max_size_bytes: u64,

    /// Blobs older than this are deleted instead of delivered.
    pub retention: Duration,

    /// Staged writes older than this are treated as abandoned.
    pub write_timeout: Duration,

    /// How often the owner should run a maintenance pass.
    pub maintenance_interval: Duration,
}

impl StorageConfig {
    /// Config with default limits rooted at `root_dir`.
    pub fn new(root_dir: PathBuf) -> Self {
        StorageConfig {
            root_dir,
            max_size_bytes: crate::DEFAULT_MAX_SIZE_BYTES,
            retention: Duration::from_secs(crate::DEFAULT_RETENTION_SECS),
            write_timeout: Duration::from_secs(crate::DEFAULT_WRITE_TIMEOUT_SECS),
            maintenance_interval: Duration::from_millis(crate::DEFAULT_MAINTENANCE_INTERVAL_MS),
        }
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }
}

/// What one enumeration pass did besides yielding blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Committed blobs handed to the caller.
    pub yielded: usize,
    /// Expired leases renamed back to committed form.
    pub leases_reclaimed: usize,
    /// Blobs deleted for exceeding retention.
    pub expired_deleted: usize,
    /// Staged files deleted for exceeding the write timeout.
    pub abandoned_deleted: usize,
    /// Leased blobs skipped because their lease is still active.
    pub leased_skipped: usize,
    /// Files that are not blobs at all.
    pub foreign_skipped: usize,
}

/// Point-in-time summary of a storage directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    pub root_dir: String,
    pub committed_files: usize,
    pub committed_bytes: u64,
    pub leased_files: usize,
    pub leased_bytes: u64,
    pub staged_files: usize,
    pub staged_bytes: u64,
    pub foreign_files: usize,
    pub total_bytes: u64,
    pub max_size_bytes: u64,
    pub quota_used_pct: f64,
    /// Age of the oldest committed or leased blob.
    pub oldest_blob_age_secs: Option<u64>,
    /// Blobs the next enumeration will delete for retention.
    pub retention_eligible_files: usize,
}

/// Disk-backed overflow queue.
#[derive(Clone)]
pub struct StorageDirectory {
    config: StorageConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for StorageDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageDirectory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StorageDirectory {
    /// Open (and create if needed) a storage directory.
    ///
    /// Never fails: if the directory cannot be created now, later writes
    /// fail softly and each maintenance pass tries again.
    pub fn new(config: StorageConfig) -> Self {
        let dir = StorageDirectory {
            config,
            sink: Arc::new(TracingSink),
        };
        dir.ensure_root();
        dir
    }

    /// Replace the diagnostic sink.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root_dir
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    /// Create the root directory if it is missing.
    pub fn ensure_root(&self) -> bool {
        match fs::create_dir_all(&self.config.root_dir) {
            Ok(()) => true,
            Err(e) => {
                self.report_io("create_dir", &self.config.root_dir, &e);
                false
            }
        }
    }

    /// Persist `payload` as a new blob.
    ///
    /// With a non-zero `lease` the blob is committed already leased, so no
    /// other consumer sees it until the lease expires. Returns `None` when
    /// the quota check refuses the write or any I/O step fails.
    pub fn create_blob(&self, payload: &[u8], lease: Duration) -> Option<Blob> {
        self.create_blob_at(Utc::now(), payload, lease)
    }

    /// [`create_blob`](Self::create_blob) with an explicit clock reading.
    pub fn create_blob_at(
        &self,
        now: DateTime<Utc>,
        payload: &[u8],
        lease: Duration,
    ) -> Option<Blob> {
        match self.try_create(now, payload, lease) {
            Ok(blob) => {
                debug!(
                    path = %blob.path().display(),
                    bytes = payload.len(),
                    "blob created"
                );
                Some(blob)
            }
            Err(StorageError::QuotaExceeded {
                used,
                requested,
                limit,
            }) => {
                warn!(
                    used_bytes = used,
                    requested_bytes = requested,
                    limit_bytes = limit,
                    "storage quota exceeded; dropping payload"
                );
                self.sink.emit(&DiagnosticEvent::QuotaExceeded {
                    used_bytes: used,
                    limit_bytes: limit,
                    requested_bytes: requested,
                });
                None
            }
            Err(e) => {
                warn!(error = %e, "blob write failed");
                self.sink.emit(&DiagnosticEvent::StorageIo {
                    op: "write".to_string(),
                    path: self.config.root_dir.display().to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    fn try_create(
        &self,
        now: DateTime<Utc>,
        payload: &[u8],
        lease: Duration,
    ) -> Result<Blob, StorageError> {
        // Check-then-write is racy across processes; an occasional overshoot
        // of one payload is accepted.
        let used = self.used_bytes();
        let requested = payload.len() as u64;
        if used.saturating_add(requested) > self.config.max_size_bytes {
            return Err(StorageError::QuotaExceeded {
                used,
                requested,
                limit: self.config.max_size_bytes,
            });
        }

        if !self.config.root_dir.is_dir() {
            fs::create_dir_all(&self.config.root_dir)
                .map_err(|e| StorageError::io(&self.config.root_dir, e))?;
        }

        Blob::write_new(&self.config.root_dir, payload, now, lease)
    }

    /// Enumerate deliverable blobs, cleaning up as a side effect.
    ///
    /// The directory listing is snapshotted when this is called; per-entry
    /// cleanup happens lazily as the iterator advances. Calling again starts
    /// a fresh pass.
    pub fn get_blobs(&self) -> Blobs<'_> {
        self.get_blobs_at(Utc::now())
    }

    /// [`get_blobs`](Self::get_blobs) evaluated at `now`.
    pub fn get_blobs_at(&self, now: DateTime<Utc>) -> Blobs<'_> {
        let entries = self.list_files();
        Blobs {
            dir: self,
            entries: entries.into_iter(),
            now,
            retention_deadline: sub_duration(now, self.config.retention),
            write_deadline: sub_duration(now, self.config.write_timeout),
            report: SweepReport::default(),
        }
    }

    /// First deliverable blob, if any.
    pub fn get_blob(&self) -> Option<Blob> {
        self.get_blobs().next()
    }

    /// Lease `blob` for `period`. See [`Blob::lease`].
    pub fn lease(&self, blob: &Blob, period: Duration) -> Option<Blob> {
        blob.lease(period)
    }

    /// Run one full enumeration and report what it cleaned up.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut blobs = self.get_blobs_at(now);
        for _ in &mut blobs {}
        let report = blobs.into_report();
        if report.leases_reclaimed + report.expired_deleted + report.abandoned_deleted > 0 {
            info!(
                reclaimed = report.leases_reclaimed,
                expired = report.expired_deleted,
                abandoned = report.abandoned_deleted,
                "storage sweep"
            );
        }
        report
    }

    /// Total size of everything under the root, in bytes.
    pub fn used_bytes(&self) -> u64 {
        directory_size(&self.config.root_dir)
    }

    /// Summarize the directory without modifying it.
    pub fn status(&self) -> StorageStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> StorageStatus {
        let retention_deadline = sub_duration(now, self.config.retention);
        let mut status = StorageStatus {
            root_dir: self.config.root_dir.display().to_string(),
            committed_files: 0,
            committed_bytes: 0,
            leased_files: 0,
            leased_bytes: 0,
            staged_files: 0,
            staged_bytes: 0,
            foreign_files: 0,
            total_bytes: 0,
            max_size_bytes: self.config.max_size_bytes,
            quota_used_pct: 0.0,
            oldest_blob_age_secs: None,
            retention_eligible_files: 0,
        };
        let mut oldest: Option<DateTime<Utc>> = None;

        for path in self.list_files() {
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            status.total_bytes += size;

            let Some(name) = parse_file_name(&path) else {
                status.foreign_files += 1;
                continue;
            };

            match name.state() {
                BlobState::Staged => {
                    status.staged_files += 1;
                    status.staged_bytes += size;
                    continue;
                }
                BlobState::Committed => {
                    status.committed_files += 1;
                    status.committed_bytes += size;
                }
                BlobState::Leased { .. } => {
                    status.leased_files += 1;
                    status.leased_bytes += size;
                }
            }

            if name.created() < retention_deadline {
                status.retention_eligible_files += 1;
            }
            oldest = Some(oldest.map_or(name.created(), |o| o.min(name.created())));
        }

        if self.config.max_size_bytes > 0 {
            status.quota_used_pct =
                (status.total_bytes as f64 / self.config.max_size_bytes as f64) * 100.0;
        }
        status.oldest_blob_age_secs =
            oldest.map(|o| (now - o).num_seconds().max(0) as u64);
        status
    }

    /// Regular files directly under the root, sorted by name.
    fn list_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.config.root_dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    self.report_io("read_dir", &self.config.root_dir, &e);
                }
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        files.sort();
        files
    }

    fn remove(&self, path: &Path, reason: DropReason) -> bool {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(path) {
            Ok(()) => {
                warn!(
                    path = %path.display(),
                    size_bytes = size,
                    reason = %reason,
                    "dropping stored telemetry"
                );
                self.sink.emit(&DiagnosticEvent::BlobDropped {
                    path: path.display().to_string(),
                    size_bytes: size,
                    reason,
                });
                true
            }
            // Another consumer got there first; nothing was lost by us.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                self.report_io("delete", path, &e);
                false
            }
        }
    }

    /// Delete a blob whose content turned out to be unusable.
    pub fn discard_corrupt(&self, blob: &Blob) -> bool {
        self.remove(blob.path(), DropReason::Corrupt)
    }

    fn report_io(&self, op: &str, path: &Path, error: &std::io::Error) {
        warn!(op, path = %path.display(), error = %error, "storage I/O failure");
        self.sink.emit(&DiagnosticEvent::StorageIo {
            op: op.to_string(),
            path: path.display().to_string(),
            error: error.to_string(),
        });
    }
}

/// Lazy, finite enumeration of deliverable blobs.
///
/// Produced by [`StorageDirectory::get_blobs`].
pub struct Blobs<'a> {
    dir: &'a StorageDirectory,
    entries: std::vec::IntoIter<PathBuf>,
    now: DateTime<Utc>,
    retention_deadline: DateTime<Utc>,
    write_deadline: DateTime<Utc>,
    report: SweepReport,
}

impl Blobs<'_> {
    /// Cleanup performed so far.
    pub fn report(&self) -> &SweepReport {
        &self.report
    }

    pub fn into_report(self) -> SweepReport {
        self.report
    }

    fn visit(&mut self, path: PathBuf) -> Option<Blob> {
        let Some(name) = parse_file_name(&path) else {
            self.report.foreign_skipped += 1;
            return None;
        };

        match name.state() {
            BlobState::Staged => {
                if name.created() < self.write_deadline
                    && self.dir.remove(&path, DropReason::AbandonedWrite)
                {
                    self.report.abandoned_deleted += 1;
                }
                None
            }
            BlobState::Leased { until } => {
                if name.created() < self.retention_deadline {
                    if self.dir.remove(&path, DropReason::Retention) {
                        self.report.expired_deleted += 1;
                    }
                    return None;
                }
                if until > self.now {
                    self.report.leased_skipped += 1;
                    return None;
                }
                let blob = self.reclaim(&path, &name)?;
                self.report.yielded += 1;
                Some(blob)
            }
            BlobState::Committed => {
                if name.created() < self.retention_deadline {
                    if self.dir.remove(&path, DropReason::Retention) {
                        self.report.expired_deleted += 1;
                    }
                    return None;
                }
                self.report.yielded += 1;
                Some(Blob::from_parts(self.dir.root(), name))
            }
        }
    }

    /// Rename an expired lease back to its committed name.
    fn reclaim(&mut self, path: &Path, name: &BlobName) -> Option<Blob> {
        let committed = Blob::from_parts(self.dir.root(), name.committed());
        match fs::rename(path, committed.path()) {
            Ok(()) => {
                debug!(path = %committed.path().display(), "expired lease reclaimed");
                self.report.leases_reclaimed += 1;
                Some(committed)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "lease reclaimed by another consumer");
                None
            }
            Err(e) => {
                self.dir.report_io("rename", path, &e);
                None
            }
        }
    }
}

impl Iterator for Blobs<'_> {
    type Item = Blob;

    fn next(&mut self) -> Option<Blob> {
        loop {
            let path = self.entries.next()?;
            if let Some(blob) = self.visit(path) {
                return Some(blob);
            }
        }
    }
}

fn parse_file_name(path: &Path) -> Option<BlobName> {
    let file_name = path.file_name()?.to_str()?;
    BlobName::parse(file_name).ok()
}

/// Recursive size of a directory. Unreadable entries count as zero.
pub fn directory_size(path: &Path) -> u64 {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut total = 0u64;
    for entry in entries.filter_map(|e| e.ok()) {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            total = total.saturating_add(directory_size(&entry.path()));
        } else if let Ok(meta) = entry.metadata() {
            total = total.saturating_add(meta.len());
        }
    }
    total
}
