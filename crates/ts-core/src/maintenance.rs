//! Background maintenance worker.
//!
//! One thread per transmitter. Every interval it runs a maintenance pass:
//! re-create the storage root if it vanished, sweep the directory, and drain
//! stored blobs when the backoff retry window is open.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::TransmitError;
use crate::transmitter::Pipeline;

/// Granularity of shutdown checks while waiting between passes.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Handle to the running maintenance thread.
pub struct MaintenanceWorker {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MaintenanceWorker {
    pub(crate) fn start(pipeline: Arc<Pipeline>, interval: Duration) -> Result<Self, TransmitError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("telespool-maintenance".to_string())
            .spawn(move || {
                maintenance_loop(&pipeline, interval, &shutdown_clone);
            })
            .map_err(TransmitError::Spawn)?;

        info!(interval_ms = interval.as_millis() as u64, "maintenance worker started");
        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Signal the thread and wait for it to finish its current pass.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(()) => info!("maintenance worker stopped"),
                Err(payload) => warn!(
                    panic = %panic_message(payload.as_ref()),
                    "maintenance thread panicked"
                ),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for MaintenanceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn maintenance_loop(pipeline: &Pipeline, interval: Duration, shutdown: &AtomicBool) {
    loop {
        if !wait(interval, shutdown) {
            break;
        }
        let report = pipeline.maintenance_pass();
        debug!(
            expired = report.sweep.expired_deleted,
            reclaimed = report.sweep.leases_reclaimed,
            drained = report.drain.as_ref().map_or(0, |d| d.delivered_records),
            "maintenance pass finished"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Sleep for `interval`, returning `false` as soon as shutdown is requested.
fn wait(interval: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
}
