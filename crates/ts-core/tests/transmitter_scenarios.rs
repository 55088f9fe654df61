//! End-to-end transmitter scenarios against a real temporary directory.
//!
//! The transport is scripted; storage, backoff and classification are real.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use ts_common::{DiagnosticEvent, DropReason, MemorySink};
use ts_core::backoff::MaxJitter;
use ts_core::{
    BackoffConfig, CancellationToken, DeliveryOutcome, MockTransport, RecordError, TelemetryBatch,
    Transmitter, TransmitterConfig, TransportError,
};
use ts_storage::BlobName;

struct Harness {
    _dir: TempDir,
    mock: Arc<MockTransport>,
    sink: MemorySink,
    tx: Transmitter,
}

fn harness_with(configure: impl FnOnce(&mut TransmitterConfig)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = TransmitterConfig::new(dir.path().join("spool"));
    configure(&mut config);

    let mock = Arc::new(MockTransport::new());
    let sink = MemorySink::new();
    let tx = Transmitter::builder(config, mock.clone())
        .with_sink(Arc::new(sink.clone()))
        .with_jitter(Box::new(MaxJitter))
        .with_maintenance(false)
        .build()
        .unwrap();
    Harness {
        _dir: dir,
        mock,
        sink,
        tx,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn batch(n: usize) -> TelemetryBatch {
    TelemetryBatch::from_strings((0..n).map(|i| format!("{{\"seq\":{}}}", i))).unwrap()
}

fn stored_batches(tx: &Transmitter) -> Vec<TelemetryBatch> {
    tx.storage()
        .get_blobs()
        .map(|blob| TelemetryBatch::decode(&blob.read().unwrap()).unwrap())
        .collect()
}

fn store(tx: &Transmitter, batch: &TelemetryBatch) {
    tx.storage()
        .create_blob(&batch.encode(), Duration::ZERO)
        .unwrap();
}

// ============================================================================
// Live submit
// ============================================================================

#[test]
fn full_acceptance_leaves_storage_empty() {
    let h = harness();
    h.mock.push_status(200);

    assert_eq!(h.tx.submit(&batch(10), &CancellationToken::new()), 10);
    assert_eq!(h.mock.calls(), 1);
    assert!(stored_batches(&h.tx).is_empty());
    assert!(h.sink.is_empty());
}

#[test]
fn partial_acceptance_persists_only_retriable_records() {
    let h = harness();
    h.mock.push(Ok(DeliveryOutcome::partial(vec![
        RecordError::new(3, 503),
        RecordError::new(7, 429),
    ])));

    let original = batch(10);
    assert_eq!(h.tx.submit(&original, &CancellationToken::new()), 8);

    let stored = stored_batches(&h.tx);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], original.subset(&[3, 7]));
    assert!(h.sink.is_empty());
}

#[test]
fn partial_acceptance_reports_non_retriable_records() {
    let h = harness();
    h.mock.push(Ok(DeliveryOutcome::partial(vec![
        RecordError::new(0, 400),
        RecordError::new(1, 500),
    ])));

    // Accepted counts everything not retried, rejected records included.
    assert_eq!(h.tx.submit(&batch(4), &CancellationToken::new()), 3);
    assert_eq!(stored_batches(&h.tx), vec![batch(4).subset(&[1])]);
    assert_eq!(
        h.sink.events(),
        vec![DiagnosticEvent::BatchDropped {
            records: 1,
            reason: DropReason::NonRetriable
        }]
    );
}

#[test]
fn transport_error_persists_everything_without_backoff_failure() {
    let h = harness();
    h.mock
        .push(Err(TransportError::Connection("refused".to_string())));

    assert_eq!(h.tx.submit(&batch(10), &CancellationToken::new()), 0);
    assert_eq!(stored_batches(&h.tx), vec![batch(10)]);
    assert_eq!(h.tx.backoff().consecutive_errors(), 0);
    assert!(!h.tx.is_degraded());
}

#[test]
fn repeated_server_errors_engage_backoff_and_short_circuit() {
    let h = harness_with(|config| {
        config.backoff = BackoffConfig {
            degraded_threshold: Duration::from_secs(12),
            min_error_update_interval: Duration::ZERO,
            ..BackoffConfig::default()
        };
    });
    h.mock.set_fallback(Ok(DeliveryOutcome::status(503)));
    let token = CancellationToken::new();

    for _ in 0..3 {
        assert_eq!(h.tx.submit(&batch(2), &token), 0);
    }
    assert!(h.tx.is_degraded());
    assert_eq!(h.mock.calls(), 3);

    assert_eq!(h.tx.submit(&batch(2), &token), 0);
    assert_eq!(h.mock.calls(), 3, "degraded submit must not reach the transport");
    assert_eq!(stored_batches(&h.tx).len(), 4);

    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, DiagnosticEvent::BackoffEngaged { .. })));
}

#[test]
fn success_clears_degraded_state() {
    let h = harness_with(|config| {
        config.backoff.degraded_threshold = Duration::from_secs(12);
        config.backoff.min_error_update_interval = Duration::ZERO;
    });
    for _ in 0..3 {
        h.mock.push_status(500);
        h.tx.submit(&batch(1), &CancellationToken::new());
    }
    assert!(h.tx.is_degraded());

    // Degraded submits skip the transport, so recovery comes from a drain.
    let report = h.tx.drain_stored();
    assert_eq!(report.blobs_sent, 3);
    assert!(!h.tx.is_degraded());
    assert_eq!(h.tx.backoff().consecutive_errors(), 0);
    assert!(h.sink.events().contains(&DiagnosticEvent::BackoffCleared));
}

// ============================================================================
// Drain
// ============================================================================

#[test]
fn drain_defers_and_keeps_blob_leased_when_endpoint_is_down() {
    let h = harness();
    store(&h.tx, &batch(2));
    store(&h.tx, &batch(3));
    h.mock.push_status(503);

    let report = h.tx.drain_stored();
    assert!(report.deferred);
    assert_eq!(report.blobs_sent, 1);
    assert_eq!(report.blobs_deleted, 0);
    assert_eq!(h.mock.calls(), 1);

    let status = h.tx.storage().status();
    assert_eq!(status.leased_files, 1);
    assert_eq!(status.committed_files, 1);
}

#[test]
fn maintenance_pass_skips_drain_while_retry_window_closed() {
    let h = harness();
    h.mock.push_status(503);
    h.tx.submit(&batch(2), &CancellationToken::new());
    assert!(!h.tx.backoff().retry_window_open());

    let report = h.tx.maintenance_pass();
    assert!(report.root_available);
    assert!(report.drain.is_none());
    assert_eq!(h.mock.calls(), 1);
    assert_eq!(stored_batches(&h.tx).len(), 1);
}

#[test]
fn maintenance_pass_drains_when_window_open() {
    let h = harness();
    store(&h.tx, &batch(5));

    let report = h.tx.maintenance_pass();
    let drain = report.drain.unwrap();
    assert_eq!(drain.delivered_records, 5);
    assert!(stored_batches(&h.tx).is_empty());
}

#[test]
fn drain_requeues_retriable_subset() {
    let h = harness();
    store(&h.tx, &batch(4));
    h.mock
        .push(Ok(DeliveryOutcome::partial(vec![RecordError::new(2, 502)])));

    let report = h.tx.drain_stored();
    assert_eq!(report.delivered_records, 3);
    assert_eq!(report.requeued_records, 1);
    assert_eq!(report.blobs_deleted, 1);
    assert_eq!(stored_batches(&h.tx), vec![batch(4).subset(&[2])]);
}

#[test]
fn drain_discards_corrupt_blob() {
    let h = harness();
    let root = h.tx.storage().root().to_path_buf();
    std::fs::create_dir_all(&root).unwrap();
    let name = BlobName::generate(chrono::Utc::now());
    std::fs::write(root.join(name.file_name()), b"\n\n").unwrap();

    let report = h.tx.drain_stored();
    assert_eq!(report.corrupt_blobs, 1);
    assert_eq!(report.blobs_sent, 0);
    assert_eq!(h.mock.calls(), 0);
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        DiagnosticEvent::BlobDropped {
            reason: DropReason::Corrupt,
            ..
        }
    )));
}

#[test]
fn drain_redelivers_binary_records_byte_for_byte() {
    let h = harness();
    let original = TelemetryBatch::new(vec![
        vec![0xff, 0xfe, b'x'],
        b"abc\r".to_vec(),
        b"ok".to_vec(),
    ])
    .unwrap();
    h.mock.push(Err(TransportError::Timeout));
    assert_eq!(h.tx.submit(&original, &CancellationToken::new()), 0);

    let report = h.tx.drain_stored();
    assert_eq!(report.corrupt_blobs, 0);
    assert_eq!(report.delivered_records, 3);
    assert_eq!(h.mock.sent()[1], original);
    assert!(stored_batches(&h.tx).is_empty());
    assert!(h.sink.is_empty());
}

#[test]
fn drain_reports_short_acknowledgement() {
    let h = harness();
    store(&h.tx, &batch(5));
    h.mock
        .push(Ok(DeliveryOutcome::status(200).with_items_accepted(2)));

    let report = h.tx.drain_stored();
    assert_eq!(report.delivered_records, 2);
    assert_eq!(report.blobs_deleted, 1);
    assert!(stored_batches(&h.tx).is_empty());
    assert_eq!(
        h.sink.events(),
        vec![DiagnosticEvent::BatchDropped {
            records: 3,
            reason: DropReason::Unaccepted
        }]
    );
}

#[test]
fn drain_drops_blob_on_non_retriable_status() {
    let h = harness();
    store(&h.tx, &batch(3));
    h.mock.push_status(404);

    let report = h.tx.drain_stored();
    assert_eq!(report.dropped_blobs, 1);
    assert_eq!(report.blobs_deleted, 1);
    assert!(stored_batches(&h.tx).is_empty());
    assert_eq!(
        h.sink.events(),
        vec![DiagnosticEvent::NonRetriableStatus {
            status: 404,
            records: 3
        }]
    );
}

#[test]
fn drain_respects_per_pass_limit() {
    let h = harness_with(|config| config.max_blobs_per_pass = 2);
    for n in 1..=3 {
        store(&h.tx, &batch(n));
    }

    let report = h.tx.drain_stored();
    assert_eq!(report.blobs_sent, 2);
    assert_eq!(stored_batches(&h.tx).len(), 1);

    let report = h.tx.drain_stored();
    assert_eq!(report.blobs_sent, 1);
    assert!(stored_batches(&h.tx).is_empty());
}

// ============================================================================
// Background maintenance
// ============================================================================

#[test]
fn background_worker_drains_and_stops() {
    let dir = TempDir::new().unwrap();
    let mut config = TransmitterConfig::new(dir.path().to_path_buf());
    config.storage.maintenance_interval = Duration::from_millis(20);
    let mock = Arc::new(MockTransport::new());

    let tx = Transmitter::builder(config, mock.clone())
        .with_jitter(Box::new(MaxJitter))
        .build()
        .unwrap();
    assert!(tx.maintenance_running());
    store(&tx, &batch(2));

    let deadline = Instant::now() + Duration::from_secs(5);
    let pending = |tx: &Transmitter| {
        let status = tx.storage().status();
        status.committed_files + status.leased_files
    };
    while (mock.calls() == 0 || pending(&tx) > 0) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(pending(&tx), 0);
    assert_eq!(tx.storage().get_blobs().count(), 0);
    assert!(mock.calls() >= 1);

    tx.shutdown();
}
