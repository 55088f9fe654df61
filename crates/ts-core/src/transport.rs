//! The network seam.
//!
//! The pipeline never speaks a wire protocol itself. It hands a batch to a
//! [`Transport`] and gets back either a [`DeliveryOutcome`] (the endpoint
//! answered) or a [`TransportError`] (no answer was obtained).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::TelemetryBatch;

/// Per-record rejection inside a partial-acceptance response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Position of the record in the batch that was sent.
    pub index: usize,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RecordError {
    pub fn new(index: usize, status: u16) -> Self {
        RecordError {
            index,
            status,
            message: None,
        }
    }
}

/// What the endpoint said about one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub status: u16,

    /// Accepted count reported by the endpoint, if it reports one.
    #[serde(default)]
    pub items_accepted: Option<usize>,

    /// Per-record errors (meaningful for 206).
    #[serde(default)]
    pub errors: Vec<RecordError>,

    /// Raw `Retry-After` header value, if present.
    #[serde(default)]
    pub retry_after: Option<String>,
}

impl DeliveryOutcome {
    pub fn status(status: u16) -> Self {
        DeliveryOutcome {
            status,
            ..Default::default()
        }
    }

    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn partial(errors: Vec<RecordError>) -> Self {
        DeliveryOutcome {
            status: 206,
            errors,
            ..Default::default()
        }
    }

    pub fn with_items_accepted(mut self, accepted: usize) -> Self {
        self.items_accepted = Some(accepted);
        self
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }
}

/// No response was obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Other(String),
}

/// Sends one batch to the ingestion endpoint.
///
/// Implementations block until the request completes. The pipeline calls
/// `send` from the submitting thread and from the maintenance worker, so it
/// must be safe to call concurrently.
pub trait Transport: Send + Sync {
    fn send(&self, batch: &TelemetryBatch) -> Result<DeliveryOutcome, TransportError>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockTransport;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::collections::VecDeque;
    use std::sync::{Mutex, PoisonError};

    use super::*;

    /// Scripted transport: replays queued responses, then a fallback.
    #[derive(Debug)]
    pub struct MockTransport {
        script: Mutex<VecDeque<Result<DeliveryOutcome, TransportError>>>,
        fallback: Mutex<Result<DeliveryOutcome, TransportError>>,
        sent: Mutex<Vec<TelemetryBatch>>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            MockTransport {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(Ok(DeliveryOutcome::ok())),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockTransport {
        /// Answers 200 to everything until scripted otherwise.
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue one response.
        pub fn push(&self, response: Result<DeliveryOutcome, TransportError>) -> &Self {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(response);
            self
        }

        pub fn push_status(&self, status: u16) -> &Self {
            self.push(Ok(DeliveryOutcome::status(status)))
        }

        /// Response used once the script is exhausted.
        pub fn set_fallback(&self, response: Result<DeliveryOutcome, TransportError>) {
            *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = response;
        }

        /// Every batch passed to `send`, in call order.
        pub fn sent(&self) -> Vec<TelemetryBatch> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn calls(&self) -> usize {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
        }
    }

    impl Transport for MockTransport {
        fn send(&self, batch: &TelemetryBatch) -> Result<DeliveryOutcome, TransportError> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(batch.clone());
            let scripted = self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            scripted.unwrap_or_else(|| {
                self.fallback
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_replays_script_then_fallback() {
        let mock = MockTransport::new();
        mock.push_status(503)
            .push(Err(TransportError::Timeout));
        let batch = TelemetryBatch::from_strings(["x"]).unwrap();

        assert_eq!(mock.send(&batch).unwrap().status, 503);
        assert_eq!(mock.send(&batch), Err(TransportError::Timeout));
        assert_eq!(mock.send(&batch).unwrap().status, 200);
        assert_eq!(mock.calls(), 3);
    }

    #[test]
    fn test_outcome_deserializes_with_defaults() {
        let outcome: DeliveryOutcome =
            serde_json::from_str(r#"{"status":206,"errors":[{"index":3,"status":503}]}"#)
                .unwrap();
        assert_eq!(outcome.status, 206);
        assert_eq!(outcome.errors, vec![RecordError::new(3, 503)]);
        assert!(outcome.items_accepted.is_none());
    }
}
