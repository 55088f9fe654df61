//! The transmitter: live delivery with a disk-backed fallback.
//!
//! # Paths
//!
//! - **Live** (`submit`): if degraded, persist without sending. Otherwise
//!   send, classify, and apply the classification. Returns the number of
//!   records the endpoint accepted for this call.
//! - **Drain** (maintenance): lease each stored blob, send it, classify the
//!   outcome the same way, then delete, split, or leave the blob leased.
//!
//! Records routed to storage are neither accepted nor errors; they are
//! pending. Only 5xx responses feed the backoff failure count; transport
//! failures persist the batch without touching it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use ts_common::{DiagnosticEvent, DiagnosticSink, DropReason, TracingSink};
use ts_config::Settings;
use ts_storage::{application_subdirectory, StorageConfig, StorageDirectory, SweepReport};

use crate::backoff::{BackoffConfig, BackoffManager, Jitter, RandomJitter};
use crate::batch::TelemetryBatch;
use crate::cancel::CancellationToken;
use crate::classify::{classify, Action, BackoffEffect, Classification};
use crate::error::TransmitError;
use crate::logging::event_names;
use crate::maintenance::MaintenanceWorker;
use crate::transport::{DeliveryOutcome, Transport};

/// Default lease taken on a stored blob while it is retried.
pub const DEFAULT_DRAIN_LEASE: Duration = Duration::from_secs(10);

/// Everything needed to build a [`Transmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitterConfig {
    pub storage: StorageConfig,
    pub backoff: BackoffConfig,
    /// Lease held on a stored blob while it is being retried.
    pub drain_lease: Duration,
    /// Upper bound on blobs sent per drain. 0 means unlimited.
    pub max_blobs_per_pass: usize,
}

impl TransmitterConfig {
    /// Defaults with storage rooted at `root_dir`.
    pub fn new(root_dir: PathBuf) -> Self {
        TransmitterConfig {
            storage: StorageConfig::new(root_dir),
            backoff: BackoffConfig::default(),
            drain_lease: DEFAULT_DRAIN_LEASE,
            max_blobs_per_pass: 0,
        }
    }

    pub fn validate(&self) -> Result<(), TransmitError> {
        if self.backoff.slot.is_zero() {
            return Err(TransmitError::InvalidConfig(
                "backoff slot must be positive".to_string(),
            ));
        }
        if self.drain_lease.is_zero() {
            return Err(TransmitError::InvalidConfig(
                "drain lease must be positive".to_string(),
            ));
        }
        if self.storage.maintenance_interval.is_zero() {
            return Err(TransmitError::InvalidConfig(
                "maintenance interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&Settings> for TransmitterConfig {
    fn from(settings: &Settings) -> Self {
        let base = settings.storage_base();
        let root_dir = if settings.storage.namespace_by_application {
            application_subdirectory(&base)
        } else {
            base
        };

        TransmitterConfig {
            storage: StorageConfig::new(root_dir)
                .with_max_size(settings.storage.max_size_bytes)
                .with_retention(settings.storage.retention())
                .with_write_timeout(settings.storage.write_timeout())
                .with_maintenance_interval(settings.maintenance.interval()),
            backoff: BackoffConfig {
                slot: settings.backoff.slot(),
                max_delay: settings.backoff.max_delay(),
                degraded_threshold: settings.backoff.degraded_threshold(),
                min_error_update_interval: settings.backoff.min_error_update_interval(),
            },
            drain_lease: settings.maintenance.lease(),
            max_blobs_per_pass: settings.maintenance.max_blobs_per_pass,
        }
    }
}

/// Outcome of one drain over stored blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Blobs handed to the transport.
    pub blobs_sent: usize,
    /// Blobs removed after a definitive answer.
    pub blobs_deleted: usize,
    pub delivered_records: usize,
    /// Records re-persisted as a new blob after partial acceptance.
    pub requeued_records: usize,
    pub corrupt_blobs: usize,
    /// Blobs dropped for a non-retriable status.
    pub dropped_blobs: usize,
    /// Blobs another consumer leased first.
    pub lost_races: usize,
    /// The pass stopped early because the endpoint is not taking data.
    pub deferred: bool,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub root_available: bool,
    pub sweep: SweepReport,
    /// `None` when the backoff retry window was closed.
    pub drain: Option<DrainReport>,
}

/// State shared between the caller-facing handle and the maintenance thread.
pub(crate) struct Pipeline {
    transport: Arc<dyn Transport>,
    storage: StorageDirectory,
    backoff: BackoffManager,
    sink: Arc<dyn DiagnosticSink>,
    drain_lease: Duration,
    max_blobs_per_pass: usize,
}

impl Pipeline {
    fn submit(&self, batch: &TelemetryBatch, cancel: &CancellationToken) -> usize {
        if cancel.is_cancelled() {
            debug!(
                event = event_names::SUBMIT_CANCELLED,
                records = batch.len(),
                "submit cancelled before start"
            );
            return 0;
        }
        if batch.is_empty() {
            return 0;
        }

        if self.backoff.is_degraded() {
            debug!(
                event = event_names::SUBMIT_SHORT_CIRCUIT,
                records = batch.len(),
                "degraded; persisting without sending"
            );
            self.persist(batch);
            return 0;
        }

        let outcome = self.send(batch);
        let classification = classify(outcome.as_ref(), batch.len());
        self.apply_feedback(outcome.as_ref(), &classification);

        match classification.action {
            Action::Accept { accepted } => {
                debug!(
                    event = event_names::SUBMIT_ACCEPTED,
                    records = batch.len(),
                    accepted,
                    "batch delivered"
                );
                self.report_unaccepted(batch.len(), accepted);
                accepted
            }
            Action::Retry {
                accepted,
                retry,
                rejected,
            } => {
                self.report_rejected_records(rejected);
                self.persist(&batch.subset(&retry));
                accepted
            }
            Action::PersistAll { kind } => {
                debug!(kind = %kind, records = batch.len(), "batch not delivered");
                self.persist(batch);
                0
            }
            Action::Drop { status } => {
                self.report_non_retriable(status, batch.len());
                0
            }
        }
    }

    fn send(&self, batch: &TelemetryBatch) -> Option<DeliveryOutcome> {
        match self.transport.send(batch) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, records = batch.len(), "transport failure");
                None
            }
        }
    }

    /// Apply the backoff side of a classification.
    fn apply_feedback(&self, outcome: Option<&DeliveryOutcome>, classification: &Classification) {
        if let Some(raw) = outcome.and_then(|o| o.retry_after.as_deref()) {
            self.backoff.note_retry_after(raw);
        }
        match classification.backoff {
            BackoffEffect::Success => self.backoff.report_success(),
            BackoffEffect::Failure => self.backoff.report_failure(),
            BackoffEffect::None => {}
        }
    }

    fn persist(&self, batch: &TelemetryBatch) -> bool {
        if batch.is_empty() {
            return true;
        }
        match self.storage.create_blob(&batch.encode(), Duration::ZERO) {
            Some(blob) => {
                debug!(
                    event = event_names::SUBMIT_PERSISTED,
                    records = batch.len(),
                    path = %blob.path().display(),
                    "batch persisted"
                );
                true
            }
            // Storage already reported why.
            None => false,
        }
    }

    fn report_non_retriable(&self, status: u16, records: usize) {
        warn!(
            event = event_names::SUBMIT_DROPPED,
            status, records, "non-retriable status; dropping batch"
        );
        self.sink
            .emit(&DiagnosticEvent::NonRetriableStatus { status, records });
    }

    fn report_rejected_records(&self, rejected: usize) {
        if rejected == 0 {
            return;
        }
        warn!(
            event = event_names::SUBMIT_DROPPED,
            records = rejected,
            "records rejected in partial response"
        );
        self.sink.emit(&DiagnosticEvent::BatchDropped {
            records: rejected,
            reason: DropReason::NonRetriable,
        });
    }

    /// A 200 that acknowledged only part of the batch.
    fn report_unaccepted(&self, sent: usize, accepted: usize) {
        let missing = sent.saturating_sub(accepted);
        if missing == 0 {
            return;
        }
        warn!(
            event = event_names::SUBMIT_DROPPED,
            records = missing,
            accepted,
            "endpoint acknowledged fewer records than sent"
        );
        self.sink.emit(&DiagnosticEvent::BatchDropped {
            records: missing,
            reason: DropReason::Unaccepted,
        });
    }

    pub(crate) fn drain_stored(&self) -> DrainReport {
        let mut report = DrainReport::default();

        for blob in self.storage.get_blobs() {
            if self.max_blobs_per_pass > 0 && report.blobs_sent >= self.max_blobs_per_pass {
                break;
            }

            let Some(leased) = blob.lease(self.drain_lease) else {
                report.lost_races += 1;
                continue;
            };

            let decoded = leased.read().map(|bytes| TelemetryBatch::decode(&bytes));
            let batch = match decoded {
                Some(Ok(batch)) => batch,
                Some(Err(e)) => {
                    warn!(path = %leased.path().display(), error = %e, "stored blob is corrupt");
                    self.storage.discard_corrupt(&leased);
                    report.corrupt_blobs += 1;
                    continue;
                }
                None => {
                    self.storage.discard_corrupt(&leased);
                    report.corrupt_blobs += 1;
                    continue;
                }
            };

            report.blobs_sent += 1;
            let outcome = self.send(&batch);
            let classification = classify(outcome.as_ref(), batch.len());
            self.apply_feedback(outcome.as_ref(), &classification);

            match classification.action {
                Action::Accept { accepted } => {
                    report.delivered_records += accepted;
                    self.report_unaccepted(batch.len(), accepted);
                    if leased.delete() {
                        report.blobs_deleted += 1;
                    }
                }
                Action::Retry {
                    accepted,
                    retry,
                    rejected,
                } => {
                    report.delivered_records += accepted;
                    self.report_rejected_records(rejected);
                    let subset = batch.subset(&retry);
                    if self.persist(&subset) {
                        report.requeued_records += subset.len();
                    }
                    if leased.delete() {
                        report.blobs_deleted += 1;
                    }
                }
                Action::PersistAll { kind } => {
                    // The blob stays leased and reappears when the lease runs out.
                    debug!(kind = %kind, path = %leased.path().display(), "drain deferred");
                    report.deferred = true;
                    break;
                }
                Action::Drop { status } => {
                    self.report_non_retriable(status, batch.len());
                    if leased.delete() {
                        report.blobs_deleted += 1;
                    }
                    report.dropped_blobs += 1;
                }
            }
        }

        if report.blobs_sent > 0 || report.corrupt_blobs > 0 {
            info!(
                event = event_names::DRAIN_FINISHED,
                sent = report.blobs_sent,
                delivered = report.delivered_records,
                requeued = report.requeued_records,
                deferred = report.deferred,
                "stored telemetry drained"
            );
        }
        report
    }

    pub(crate) fn maintenance_pass(&self) -> MaintenanceReport {
        let root_available = self.storage.ensure_root();
        let sweep = self.storage.sweep();

        let drain = if self.backoff.retry_window_open() {
            Some(self.drain_stored())
        } else {
            debug!(
                event = event_names::MAINTENANCE_PASS,
                delay_secs = self.backoff.current_delay().as_secs(),
                "retry window closed; drain skipped"
            );
            None
        };

        MaintenanceReport {
            root_available,
            sweep,
            drain,
        }
    }
}

/// Builder for [`Transmitter`].
pub struct TransmitterBuilder {
    config: TransmitterConfig,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn DiagnosticSink>,
    jitter: Box<dyn Jitter>,
    maintenance: bool,
}

impl TransmitterBuilder {
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_jitter(mut self, jitter: Box<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether to start the background maintenance thread (default on).
    pub fn with_maintenance(mut self, enabled: bool) -> Self {
        self.maintenance = enabled;
        self
    }

    pub fn build(self) -> Result<Transmitter, TransmitError> {
        self.config.validate()?;

        let interval = self.config.storage.maintenance_interval;
        let storage =
            StorageDirectory::new(self.config.storage).with_sink(Arc::clone(&self.sink));
        let backoff = BackoffManager::new(self.config.backoff)
            .with_jitter(self.jitter)
            .with_sink(Arc::clone(&self.sink));

        let pipeline = Arc::new(Pipeline {
            transport: self.transport,
            storage,
            backoff,
            sink: self.sink,
            drain_lease: self.config.drain_lease,
            max_blobs_per_pass: self.config.max_blobs_per_pass,
        });

        let worker = if self.maintenance {
            Some(MaintenanceWorker::start(Arc::clone(&pipeline), interval)?)
        } else {
            None
        };

        Ok(Transmitter { pipeline, worker })
    }
}

/// Durable telemetry transmitter.
///
/// Dropping the transmitter stops the maintenance thread.
pub struct Transmitter {
    pipeline: Arc<Pipeline>,
    worker: Option<MaintenanceWorker>,
}

impl Transmitter {
    pub fn builder(config: TransmitterConfig, transport: Arc<dyn Transport>) -> TransmitterBuilder {
        TransmitterBuilder {
            config,
            transport,
            sink: Arc::new(TracingSink),
            jitter: Box::new(RandomJitter),
            maintenance: true,
        }
    }

    /// Build with default sink and jitter, and start maintenance.
    pub fn new(
        config: TransmitterConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TransmitError> {
        Self::builder(config, transport).build()
    }

    /// Deliver `batch`, persisting whatever is not accepted.
    ///
    /// Returns the number of records the endpoint accepted. Never fails:
    /// undelivered records are stored or, for non-retriable statuses,
    /// dropped with a diagnostic. A cancelled token makes this a no-op.
    pub fn submit(&self, batch: &TelemetryBatch, cancel: &CancellationToken) -> usize {
        self.pipeline.submit(batch, cancel)
    }

    /// Run one maintenance pass on the calling thread.
    pub fn maintenance_pass(&self) -> MaintenanceReport {
        self.pipeline.maintenance_pass()
    }

    /// Drain stored blobs now, ignoring the retry window.
    pub fn drain_stored(&self) -> DrainReport {
        self.pipeline.drain_stored()
    }

    pub fn storage(&self) -> &StorageDirectory {
        &self.pipeline.storage
    }

    pub fn backoff(&self) -> &BackoffManager {
        &self.pipeline.backoff
    }

    pub fn is_degraded(&self) -> bool {
        self.pipeline.backoff.is_degraded()
    }

    pub fn maintenance_running(&self) -> bool {
        self.worker.as_ref().is_some_and(MaintenanceWorker::is_running)
    }

    /// Stop the maintenance thread and wait for it.
    pub fn shutdown(mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}
