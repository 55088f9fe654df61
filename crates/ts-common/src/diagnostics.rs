//! Diagnostic channel for conditions the caller is never told about directly.
//!
//! Storage operations and `submit` never return errors for retriable or
//! expected failures. Anything that loses data, or changes how the pipeline
//! behaves (degraded mode on/off), is emitted here instead.
//!
//! # Design Principles
//!
//! 1. **No silent drops**: every deliberate data loss emits exactly one event.
//! 2. **Side-channel only**: sinks cannot influence control flow.
//! 3. **Cheap**: sinks are called inline on the hot path; keep them fast.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::failure::FailureKind;

/// Why telemetry was discarded without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Older than the retention period.
    Retention,
    /// Staged write older than the write timeout.
    AbandonedWrite,
    /// Content could not be read or decoded.
    Corrupt,
    /// The endpoint returned a status outside the known table.
    NonRetriable,
    /// The endpoint acknowledged fewer records than it was sent.
    Unaccepted,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Retention => write!(f, "retention"),
            DropReason::AbandonedWrite => write!(f, "abandoned_write"),
            DropReason::Corrupt => write!(f, "corrupt"),
            DropReason::NonRetriable => write!(f, "non_retriable"),
            DropReason::Unaccepted => write!(f, "unaccepted"),
        }
    }
}

/// A single diagnostic event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// The endpoint answered with a status that is neither success nor retriable.
    NonRetriableStatus { status: u16, records: usize },

    /// A live batch was discarded without being persisted.
    BatchDropped { records: usize, reason: DropReason },

    /// A stored blob was deleted without delivery.
    BlobDropped {
        path: String,
        size_bytes: u64,
        reason: DropReason,
    },

    /// A write was refused because the directory is at its size limit.
    QuotaExceeded {
        used_bytes: u64,
        limit_bytes: u64,
        requested_bytes: u64,
    },

    /// A filesystem operation failed and was absorbed.
    StorageIo {
        op: String,
        path: String,
        error: String,
    },

    /// Delay crossed the reporting threshold; live sends are now skipped.
    BackoffEngaged { delay_secs: u64, consecutive_errors: u32 },

    /// A success was observed while degraded.
    BackoffCleared,

    /// The endpoint sent a usable Retry-After header. Informational only.
    RetryAfterHint { retry_after_secs: u64 },
}

impl DiagnosticEvent {
    /// Failure kind associated with this event, if any.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            DiagnosticEvent::NonRetriableStatus { .. } => Some(FailureKind::NonRetriable),
            DiagnosticEvent::BatchDropped { reason, .. }
            | DiagnosticEvent::BlobDropped { reason, .. } => match reason {
                DropReason::Corrupt => Some(FailureKind::CorruptBlob),
                DropReason::NonRetriable => Some(FailureKind::NonRetriable),
                DropReason::Retention | DropReason::AbandonedWrite | DropReason::Unaccepted => None,
            },
            DiagnosticEvent::QuotaExceeded { .. } => Some(FailureKind::StorageQuotaExceeded),
            DiagnosticEvent::StorageIo { .. } => Some(FailureKind::StorageIoFailure),
            DiagnosticEvent::BackoffEngaged { .. } => Some(FailureKind::ServerUnavailable),
            DiagnosticEvent::BackoffCleared | DiagnosticEvent::RetryAfterHint { .. } => None,
        }
    }

    /// Whether this event records telemetry that is gone for good.
    pub fn is_data_loss(&self) -> bool {
        matches!(
            self,
            DiagnosticEvent::NonRetriableStatus { .. }
                | DiagnosticEvent::BatchDropped { .. }
                | DiagnosticEvent::BlobDropped { .. }
                | DiagnosticEvent::QuotaExceeded { .. }
        )
    }
}

/// Receiver of diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: &DiagnosticEvent);
}

/// Sink that forwards events to `tracing`.
///
/// Data-loss events are logged at WARN, everything else at INFO.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: &DiagnosticEvent) {
        let payload = serde_json::to_string(event).unwrap_or_else(|_| format!("{:?}", event));
        if event.is_data_loss() || matches!(event, DiagnosticEvent::StorageIo { .. }) {
            warn!(target: "telespool::diagnostics", event = %payload, "telemetry diagnostic");
        } else {
            info!(target: "telespool::diagnostics", event = %payload, "telemetry diagnostic");
        }
    }
}

/// A recorded event with its arrival time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub timestamp: DateTime<Utc>,
    pub event: DiagnosticEvent,
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far, oldest first.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.event.clone())
            .collect()
    }

    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, event: &DiagnosticEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                timestamp: Utc::now(),
                event: event.clone(),
            });
    }
}

/// Sink that forwards each event to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl DiagnosticSink for FanoutSink {
    fn emit(&self, event: &DiagnosticEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
