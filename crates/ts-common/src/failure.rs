//! Failure taxonomy for the transmission pipeline.
//!
//! Failures never propagate to the caller of `submit`; they are absorbed into
//! the accepted count, the backoff state, or the diagnostic channel. This enum
//! is the shared vocabulary those three places use.
//!
//! Codes are stable and grouped by category:
//! - 10-19: delivery failures
//! - 20-29: storage failures

use serde::{Deserialize, Serialize};

/// Broad grouping of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The remote side was not reached or refused the batch.
    Delivery,
    /// The local overflow queue could not hold or read a payload.
    Storage,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::Delivery => write!(f, "delivery"),
            FailureCategory::Storage => write!(f, "storage"),
        }
    }
}

/// Every way a batch or blob can fail to make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No response was obtained (connection error, timeout).
    TransportFailure,
    /// 400: the endpoint rejected the data.
    ClientRejected,
    /// 429 / 439: the endpoint is shedding load.
    Throttled,
    /// 500 / 502 / 503 / 504.
    ServerUnavailable,
    /// 206: some records were accepted, others need a retry.
    PartialAccepted,
    /// Any status outside the known table. The batch is dropped.
    NonRetriable,
    /// The storage directory is at its size limit.
    StorageQuotaExceeded,
    /// A read, write, rename or delete failed.
    StorageIoFailure,
    /// A persisted blob could not be read back or decoded.
    CorruptBlob,
}

impl FailureKind {
    /// Stable numeric code for structured reporting.
    pub fn code(&self) -> u32 {
        match self {
            FailureKind::TransportFailure => 10,
            FailureKind::ClientRejected => 11,
            FailureKind::Throttled => 12,
            FailureKind::ServerUnavailable => 13,
            FailureKind::PartialAccepted => 14,
            FailureKind::NonRetriable => 15,
            FailureKind::StorageQuotaExceeded => 20,
            FailureKind::StorageIoFailure => 21,
            FailureKind::CorruptBlob => 22,
        }
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            FailureKind::TransportFailure
            | FailureKind::ClientRejected
            | FailureKind::Throttled
            | FailureKind::ServerUnavailable
            | FailureKind::PartialAccepted
            | FailureKind::NonRetriable => FailureCategory::Delivery,

            FailureKind::StorageQuotaExceeded
            | FailureKind::StorageIoFailure
            | FailureKind::CorruptBlob => FailureCategory::Storage,
        }
    }

    /// Whether the affected payload is kept for a later attempt.
    ///
    /// Partial acceptance counts as retriable because the rejected subset is
    /// persisted. Storage failures are not: the payload is lost.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FailureKind::TransportFailure
                | FailureKind::ClientRejected
                | FailureKind::Throttled
                | FailureKind::ServerUnavailable
                | FailureKind::PartialAccepted
        )
    }

    /// Map an HTTP-style status code to its failure kind.
    ///
    /// Returns `None` for 200, which is not a failure.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200 => None,
            206 => Some(FailureKind::PartialAccepted),
            400 => Some(FailureKind::ClientRejected),
            429 | 439 => Some(FailureKind::Throttled),
            500 | 502 | 503 | 504 => Some(FailureKind::ServerUnavailable),
            _ => Some(FailureKind::NonRetriable),
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::TransportFailure => "transport_failure",
            FailureKind::ClientRejected => "client_rejected",
            FailureKind::Throttled => "throttled",
            FailureKind::ServerUnavailable => "server_unavailable",
            FailureKind::PartialAccepted => "partial_accepted",
            FailureKind::NonRetriable => "non_retriable",
            FailureKind::StorageQuotaExceeded => "storage_quota_exceeded",
            FailureKind::StorageIoFailure => "storage_io_failure",
            FailureKind::CorruptBlob => "corrupt_blob",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let all = [
            FailureKind::TransportFailure,
            FailureKind::ClientRejected,
            FailureKind::Throttled,
            FailureKind::ServerUnavailable,
            FailureKind::PartialAccepted,
            FailureKind::NonRetriable,
            FailureKind::StorageQuotaExceeded,
            FailureKind::StorageIoFailure,
            FailureKind::CorruptBlob,
        ];
        let mut codes: Vec<u32> = all.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_from_status_table() {
        assert_eq!(FailureKind::from_status(200), None);
        assert_eq!(
            FailureKind::from_status(206),
            Some(FailureKind::PartialAccepted)
        );
        assert_eq!(
            FailureKind::from_status(400),
            Some(FailureKind::ClientRejected)
        );
        assert_eq!(FailureKind::from_status(439), Some(FailureKind::Throttled));
        for status in [500, 502, 503, 504] {
            assert_eq!(
                FailureKind::from_status(status),
                Some(FailureKind::ServerUnavailable)
            );
        }
        assert_eq!(FailureKind::from_status(401), Some(FailureKind::NonRetriable));
        assert_eq!(FailureKind::from_status(501), Some(FailureKind::NonRetriable));
    }

    #[test]
    fn test_category_and_retriable() {
        assert_eq!(
            FailureKind::CorruptBlob.category(),
            FailureCategory::Storage
        );
        assert_eq!(FailureKind::Throttled.category(), FailureCategory::Delivery);
        assert!(FailureKind::ServerUnavailable.is_retriable());
        assert!(!FailureKind::NonRetriable.is_retriable());
        assert!(!FailureKind::StorageQuotaExceeded.is_retriable());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&FailureKind::StorageQuotaExceeded).unwrap();
        assert_eq!(json, "\"storage_quota_exceeded\"");
        assert_eq!(
            FailureKind::StorageQuotaExceeded.to_string(),
            "storage_quota_exceeded"
        );
    }
}
