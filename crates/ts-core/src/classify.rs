//! Response classification.
//!
//! [`classify`] is a pure function from a delivery result to what should
//! happen next. It does not touch storage or backoff state; the caller
//! applies the returned [`Classification`].
//!
//! | Status              | Action                           | Backoff  |
//! |---------------------|----------------------------------|----------|
//! | 200                 | accept                           | reset    |
//! | 206                 | re-persist retriable records     | reset    |
//! | 400, 429, 439       | persist whole batch              | -        |
//! | 500, 502, 503, 504  | persist whole batch              | failure  |
//! | no response         | persist whole batch              | -        |
//! | anything else       | drop, emit diagnostic            | -        |

use std::collections::BTreeSet;

use tracing::debug;
use ts_common::FailureKind;

use crate::transport::DeliveryOutcome;

/// Per-record statuses inside a 206 that warrant a retry.
pub const RETRIABLE_RECORD_STATUSES: [u16; 6] = [429, 439, 500, 502, 503, 504];

/// What to do with the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Everything was accepted.
    Accept { accepted: usize },

    /// Re-persist the records at `retry` (sorted, distinct).
    ///
    /// `rejected` counts records the endpoint refused with a non-retriable
    /// per-record status; they are lost.
    Retry {
        accepted: usize,
        retry: Vec<usize>,
        rejected: usize,
    },

    /// Persist the whole batch for a later attempt.
    PersistAll { kind: FailureKind },

    /// Give up on the batch.
    Drop { status: u16 },
}

/// Effect on the backoff state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffEffect {
    None,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub action: Action,
    pub backoff: BackoffEffect,
}

impl Classification {
    /// Records durably accepted by the endpoint.
    pub fn accepted(&self) -> usize {
        match &self.action {
            Action::Accept { accepted } | Action::Retry { accepted, .. } => *accepted,
            Action::PersistAll { .. } | Action::Drop { .. } => 0,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.action {
            Action::Accept { .. } => None,
            Action::Retry { .. } => Some(FailureKind::PartialAccepted),
            Action::PersistAll { kind } => Some(*kind),
            Action::Drop { .. } => Some(FailureKind::NonRetriable),
        }
    }
}

/// Classify one delivery attempt of a batch of `batch_len` records.
///
/// `None` means no response was obtained.
pub fn classify(outcome: Option<&DeliveryOutcome>, batch_len: usize) -> Classification {
    let Some(outcome) = outcome else {
        return Classification {
            action: Action::PersistAll {
                kind: FailureKind::TransportFailure,
            },
            backoff: BackoffEffect::None,
        };
    };

    match outcome.status {
        200 => Classification {
            action: Action::Accept {
                accepted: outcome
                    .items_accepted
                    .map_or(batch_len, |n| n.min(batch_len)),
            },
            backoff: BackoffEffect::Success,
        },
        206 => classify_partial(outcome, batch_len),
        400 => persist_all(FailureKind::ClientRejected, BackoffEffect::None),
        429 | 439 => persist_all(FailureKind::Throttled, BackoffEffect::None),
        500 | 502 | 503 | 504 => persist_all(FailureKind::ServerUnavailable, BackoffEffect::Failure),
        status => Classification {
            action: Action::Drop { status },
            backoff: BackoffEffect::None,
        },
    }
}

fn persist_all(kind: FailureKind, backoff: BackoffEffect) -> Classification {
    Classification {
        action: Action::PersistAll { kind },
        backoff,
    }
}

fn classify_partial(outcome: &DeliveryOutcome, batch_len: usize) -> Classification {
    let mut retry = BTreeSet::new();
    let mut rejected = BTreeSet::new();

    for error in &outcome.errors {
        if error.index >= batch_len {
            debug!(
                index = error.index,
                batch_len, "partial response names a record outside the batch"
            );
            continue;
        }
        if RETRIABLE_RECORD_STATUSES.contains(&error.status) {
            retry.insert(error.index);
        } else {
            rejected.insert(error.index);
        }
    }
    // A record reported both ways is retried.
    let rejected = rejected.difference(&retry).count();

    let accepted = batch_len - retry.len();
    let action = if retry.is_empty() && rejected == 0 {
        Action::Accept { accepted }
    } else {
        Action::Retry {
            accepted,
            retry: retry.into_iter().collect(),
            rejected,
        }
    };

    Classification {
        action,
        backoff: BackoffEffect::Success,
    }
}
