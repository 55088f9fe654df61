//! Telespool core: durable telemetry transmission.
//!
//! `submit` tries live delivery, classifies the outcome, and routes anything
//! undelivered to the on-disk overflow queue. A background maintenance worker
//! sweeps that queue and drains it back through the same send/classify path,
//! paced by an exponential backoff with jitter.

pub mod backoff;
pub mod batch;
pub mod cancel;
pub mod classify;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod maintenance;
pub mod transmitter;
pub mod transport;

pub use backoff::{BackoffConfig, BackoffManager, BackoffSnapshot, Jitter, RandomJitter};
pub use batch::{CodecError, TelemetryBatch};
pub use cancel::CancellationToken;
pub use classify::{classify, Action, BackoffEffect, Classification};
pub use error::TransmitError;
pub use transmitter::{
    DrainReport, MaintenanceReport, Transmitter, TransmitterBuilder, TransmitterConfig,
};
pub use transport::{DeliveryOutcome, RecordError, Transport, TransportError};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::MockTransport;
