//! Exponential backoff with jitter and a sticky degraded flag.
//!
//! # State machine
//!
//! - `report_failure`: if the current delay already exceeds the degraded
//!   threshold, enter degraded mode. Then, at most once per
//!   `min_error_update_interval`, bump the consecutive error count and draw a
//!   new delay.
//! - `report_success`: leave degraded mode, zero the error count and restore
//!   the base delay.
//!
//! The delay for `n` consecutive errors is the base slot for `n <= 1`, and
//! otherwise a uniform draw from `[1, (2^n - 1) / 2 * slot]` clamped to
//! `[slot, max_delay]`. The draw spreads retries from independent processes
//! hitting the same endpoint.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use ts_common::{DiagnosticEvent, DiagnosticSink, TracingSink};

use crate::logging::event_names;

/// Backoff tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub slot: Duration,
    pub max_delay: Duration,
    pub degraded_threshold: Duration,
    pub min_error_update_interval: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            slot: Duration::from_secs(10),
            max_delay: Duration::from_secs(3600),
            degraded_threshold: Duration::from_secs(1800),
            min_error_update_interval: Duration::from_secs(10),
        }
    }
}

/// Source of the random component of the delay.
pub trait Jitter: Send + Sync {
    /// Uniform sample from `low..=high`. Callers guarantee `low <= high`.
    fn sample(&self, low: u64, high: u64) -> u64;
}

/// Thread-local RNG jitter.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self, low: u64, high: u64) -> u64 {
        rand::rng().random_range(low..=high)
    }
}

/// Always the upper bound. Makes delays deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxJitter;

impl Jitter for MaxJitter {
    fn sample(&self, _low: u64, high: u64) -> u64 {
        high
    }
}

/// Point-in-time view of the backoff state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackoffSnapshot {
    pub consecutive_errors: u32,
    pub current_delay_secs: u64,
    pub degraded: bool,
    /// Last usable Retry-After hint. Informational only.
    pub retry_after_hint_secs: Option<u64>,
}

#[derive(Debug)]
struct BackoffState {
    consecutive_errors: u32,
    current_delay: Duration,
    degraded: bool,
    last_error_update: Option<Instant>,
    last_failure: Option<Instant>,
    retry_after_hint: Option<Duration>,
}

/// Shared backoff state for one transmitter.
pub struct BackoffManager {
    config: BackoffConfig,
    jitter: Box<dyn Jitter>,
    sink: Arc<dyn DiagnosticSink>,
    state: Mutex<BackoffState>,
}

impl std::fmt::Debug for BackoffManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffManager")
            .field("config", &self.config)
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl BackoffManager {
    pub fn new(config: BackoffConfig) -> Self {
        let current_delay = config.slot;
        BackoffManager {
            config,
            jitter: Box::new(RandomJitter),
            sink: Arc::new(TracingSink),
            state: Mutex::new(BackoffState {
                consecutive_errors: 0,
                current_delay,
                degraded: false,
                last_error_update: None,
                last_failure: None,
                retry_after_hint: None,
            }),
        }
    }

    pub fn with_jitter(mut self, jitter: Box<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BackoffState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn report_failure(&self) {
        self.report_failure_at(Instant::now());
    }

    pub fn report_failure_at(&self, now: Instant) {
        let mut state = self.lock();
        state.last_failure = Some(now);

        if !state.degraded && state.current_delay > self.config.degraded_threshold {
            state.degraded = true;
            warn!(
                event = event_names::BACKOFF_ENGAGED,
                delay_secs = state.current_delay.as_secs(),
                consecutive_errors = state.consecutive_errors,
                "backoff delay exceeds threshold; live sends suspended"
            );
            self.sink.emit(&DiagnosticEvent::BackoffEngaged {
                delay_secs: state.current_delay.as_secs(),
                consecutive_errors: state.consecutive_errors,
            });
        }

        let due = state.last_error_update.map_or(true, |last| {
            now.saturating_duration_since(last) >= self.config.min_error_update_interval
        });
        if due {
            state.consecutive_errors = state.consecutive_errors.saturating_add(1);
            state.last_error_update = Some(now);
            state.current_delay = self.compute_delay(state.consecutive_errors);
            debug!(
                consecutive_errors = state.consecutive_errors,
                delay_secs = state.current_delay.as_secs(),
                "backoff failure recorded"
            );
        }
    }

    pub fn report_success(&self) {
        let mut state = self.lock();
        if state.degraded {
            state.degraded = false;
            info!(event = event_names::BACKOFF_CLEARED, "delivery recovered; live sends resumed");
            self.sink.emit(&DiagnosticEvent::BackoffCleared);
        }
        state.consecutive_errors = 0;
        state.current_delay = self.config.slot;
        state.last_failure = None;
    }

    /// Delay for `consecutive_errors` failures in a row.
    pub fn compute_delay(&self, consecutive_errors: u32) -> Duration {
        let slot = self.config.slot.as_secs().max(1);
        if consecutive_errors <= 1 {
            return self.config.slot;
        }

        let exponent = consecutive_errors.min(64) as i32;
        let upper = ((2f64.powi(exponent) - 1.0) / 2.0 * slot as f64).min(i32::MAX as f64);
        let upper = (upper as u64).max(1);
        let drawn = self.jitter.sample(1, upper);

        let secs = drawn.clamp(slot, self.config.max_delay.as_secs().max(slot));
        Duration::from_secs(secs)
    }

    pub fn is_degraded(&self) -> bool {
        self.lock().degraded
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.lock().consecutive_errors
    }

    pub fn current_delay(&self) -> Duration {
        self.lock().current_delay
    }

    /// Whether stored data may be retried now.
    ///
    /// Open when no failure is outstanding or `current_delay` has elapsed
    /// since the last one.
    pub fn retry_window_open(&self) -> bool {
        self.retry_window_open_at(Instant::now())
    }

    pub fn retry_window_open_at(&self, now: Instant) -> bool {
        let state = self.lock();
        match state.last_failure {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= state.current_delay,
        }
    }

    /// Keep a Retry-After hint if it parses to a positive interval.
    ///
    /// The hint never changes the computed delay.
    pub fn note_retry_after(&self, raw: &str) -> Option<Duration> {
        self.note_retry_after_at(raw, Utc::now())
    }

    pub fn note_retry_after_at(&self, raw: &str, now: DateTime<Utc>) -> Option<Duration> {
        let hint = parse_retry_after(raw, now)?;
        self.lock().retry_after_hint = Some(hint);
        debug!(retry_after_secs = hint.as_secs(), "retry-after hint recorded");
        self.sink.emit(&DiagnosticEvent::RetryAfterHint {
            retry_after_secs: hint.as_secs(),
        });
        Some(hint)
    }

    pub fn retry_after_hint(&self) -> Option<Duration> {
        self.lock().retry_after_hint
    }

    pub fn snapshot(&self) -> BackoffSnapshot {
        let state = self.lock();
        BackoffSnapshot {
            consecutive_errors: state.consecutive_errors,
            current_delay_secs: state.current_delay.as_secs(),
            degraded: state.degraded,
            retry_after_hint_secs: state.retry_after_hint.map(|d| d.as_secs()),
        }
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP date.
///
/// Returns `None` unless the result is a positive interval from `now`.
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(secs) = raw.parse::<u64>() {
        return (secs > 0).then(|| Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok().filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use ts_common::MemorySink;

    fn manager(config: BackoffConfig) -> (BackoffManager, MemorySink) {
        let sink = MemorySink::new();
        let manager = BackoffManager::new(config)
            .with_jitter(Box::new(MaxJitter))
            .with_sink(Arc::new(sink.clone()));
        (manager, sink)
    }

    fn no_interval() -> BackoffConfig {
        BackoffConfig {
            min_error_update_interval: Duration::ZERO,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn test_initial_state() {
        let (m, _) = manager(BackoffConfig::default());
        assert_eq!(m.consecutive_errors(), 0);
        assert_eq!(m.current_delay(), Duration::from_secs(10));
        assert!(!m.is_degraded());
        assert!(m.retry_window_open());
    }

    #[test]
    fn test_delay_formula_with_max_jitter() {
        let (m, _) = manager(BackoffConfig::default());
        assert_eq!(m.compute_delay(0), Duration::from_secs(10));
        assert_eq!(m.compute_delay(1), Duration::from_secs(10));
        assert_eq!(m.compute_delay(2), Duration::from_secs(15));
        assert_eq!(m.compute_delay(3), Duration::from_secs(35));
        assert_eq!(m.compute_delay(4), Duration::from_secs(75));
        assert_eq!(m.compute_delay(10), Duration::from_secs(3600));
        assert_eq!(m.compute_delay(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn test_min_interval_suppresses_burst() {
        let (m, _) = manager(BackoffConfig::default());
        let t0 = Instant::now();
        m.report_failure_at(t0);
        m.report_failure_at(t0 + Duration::from_secs(1));
        m.report_failure_at(t0 + Duration::from_secs(5));
        assert_eq!(m.consecutive_errors(), 1);

        m.report_failure_at(t0 + Duration::from_secs(10));
        assert_eq!(m.consecutive_errors(), 2);
    }

    #[test]
    fn test_degraded_only_after_delay_exceeds_threshold() {
        let (m, sink) = manager(BackoffConfig {
            degraded_threshold: Duration::from_secs(12),
            ..no_interval()
        });
        let t0 = Instant::now();

        m.report_failure_at(t0);
        assert!(!m.is_degraded());
        m.report_failure_at(t0);
        assert!(!m.is_degraded());
        assert_eq!(m.current_delay(), Duration::from_secs(15));

        m.report_failure_at(t0);
        assert!(m.is_degraded());
        assert!(matches!(
            sink.events()[0],
            DiagnosticEvent::BackoffEngaged {
                delay_secs: 15,
                consecutive_errors: 2
            }
        ));

        // Sticky until a success.
        m.report_failure_at(t0);
        assert!(m.is_degraded());
        assert_eq!(sink.len(), 1);

        m.report_success();
        assert!(!m.is_degraded());
        assert_eq!(m.consecutive_errors(), 0);
        assert_eq!(m.current_delay(), Duration::from_secs(10));
        assert_eq!(sink.events()[1], DiagnosticEvent::BackoffCleared);
    }

    #[test]
    fn test_success_when_healthy_emits_nothing() {
        let (m, sink) = manager(no_interval());
        m.report_failure_at(Instant::now());
        m.report_success();
        assert!(sink.is_empty());
        assert_eq!(m.consecutive_errors(), 0);
    }

    #[test]
    fn test_retry_window_tracks_current_delay() {
        let (m, _) = manager(no_interval());
        let t0 = Instant::now();
        m.report_failure_at(t0);
        assert!(!m.retry_window_open_at(t0 + Duration::from_secs(9)));
        assert!(m.retry_window_open_at(t0 + Duration::from_secs(10)));

        m.report_success();
        assert!(m.retry_window_open_at(t0));
    }

    #[test]
    fn test_parse_retry_after() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(
            parse_retry_after("120", now),
            Some(Duration::from_secs(120))
        );
        assert_eq!(parse_retry_after("0", now), None);
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:29:30 GMT", now),
            Some(Duration::from_secs(90))
        );
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:27:00 GMT", now), None);
        assert_eq!(parse_retry_after("soon", now), None);
        assert_eq!(parse_retry_after("", now), None);
    }

    #[test]
    fn test_retry_after_hint_is_informational() {
        let (m, sink) = manager(no_interval());
        let delay_before = m.current_delay();
        assert_eq!(m.note_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(m.retry_after_hint(), Some(Duration::from_secs(30)));
        assert_eq!(m.current_delay(), delay_before);
        assert_eq!(m.snapshot().retry_after_hint_secs, Some(30));
        assert_eq!(sink.len(), 1);

        assert_eq!(m.note_retry_after("garbage"), None);
        assert_eq!(sink.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(
            errors in 0u32..200,
            slot in 1u64..120,
            max_factor in 1u64..500,
        ) {
            let config = BackoffConfig {
                slot: Duration::from_secs(slot),
                max_delay: Duration::from_secs(slot * max_factor),
                ..BackoffConfig::default()
            };
            let m = BackoffManager::new(config.clone());
            let d = m.compute_delay(errors);
            prop_assert!(d >= config.slot);
            prop_assert!(d <= config.max_delay);
        }

        #[test]
        fn prop_error_count_non_decreasing(gaps in proptest::collection::vec(0u64..30, 1..40)) {
            let m = BackoffManager::new(BackoffConfig::default());
            let mut now = Instant::now();
            let mut previous = 0;
            for gap in gaps {
                now += Duration::from_secs(gap);
                m.report_failure_at(now);
                let current = m.consecutive_errors();
                prop_assert!(current >= previous);
                prop_assert!(current - previous <= 1);
                previous = current;
            }
        }
    }
}
