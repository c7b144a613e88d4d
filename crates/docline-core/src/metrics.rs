//! # Metrics Sink
//!
//! Counters and timers reported by the graph manager and migration engine.
//!
//! Reporting is fire-and-forget: `MetricsSink` methods cannot fail and never
//! block on anything but a short in-process lock, so a slow or broken sink
//! cannot hold up a lineage write.
//!
//! ## Counter Names
//!
//! Every operation reports `<name>` on success and `<name>_failed` on error.
//! The cycle check additionally reports its duration under
//! `validate_cycle_check`.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub const ADD_DOCUMENT: &str = "add_document";
pub const ADD_DOCUMENT_FAILED: &str = "add_document_failed";
pub const ADD_DERIVATION: &str = "add_derivation";
pub const ADD_DERIVATION_FAILED: &str = "add_derivation_failed";
pub const DELETE_DOCUMENT: &str = "delete_document";
pub const DELETE_DOCUMENT_FAILED: &str = "delete_document_failed";
pub const MIGRATE: &str = "migrate";
pub const MIGRATE_FAILED: &str = "migrate_failed";
pub const VALIDATE_CYCLE_CHECK: &str = "validate_cycle_check";
pub const VALIDATE_CYCLE_CHECK_FAILED: &str = "validate_cycle_check_failed";

// =============================================================================
// SINK TRAIT
// =============================================================================

/// Receiver of operation counters and timings.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Add one to a counter.
    fn increment(&self, name: &'static str);

    /// Record how long an operation took.
    fn record_duration(&self, name: &'static str, elapsed: Duration);
}

/// Report `name` or `failed` depending on the outcome.
pub(crate) fn record_outcome<T, E>(
    sink: &dyn MetricsSink,
    result: &Result<T, E>,
    name: &'static str,
    failed: &'static str,
) {
    sink.increment(if result.is_ok() { name } else { failed });
}

/// Measures one operation and reports it on `finish`.
pub(crate) struct Timer {
    name: &'static str,
    started: Instant,
}

impl Timer {
    pub(crate) fn start(name: &'static str) -> Self {
        Self {
            name,
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(self, sink: &dyn MetricsSink) {
        sink.record_duration(self.name, self.started.elapsed());
    }
}

// =============================================================================
// IMPLEMENTATIONS
// =============================================================================

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &'static str) {}

    fn record_duration(&self, _name: &'static str, _elapsed: Duration) {}
}

/// Aggregated timing of one operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimingSummary {
    /// Number of recorded samples.
    pub count: u64,
    /// Sum of all samples.
    pub total: Duration,
    /// Longest sample.
    pub max: Duration,
}

#[derive(Debug, Default)]
struct MetricsState {
    counters: BTreeMap<&'static str, u64>,
    timings: BTreeMap<&'static str, TimingSummary>,
}

/// Keeps counters and timings in memory, for tests and the CLI `status`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    state: Mutex<MetricsState>,
}

impl InMemoryMetrics {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.state.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// All counters, sorted by name.
    #[must_use]
    pub fn counters(&self) -> BTreeMap<&'static str, u64> {
        self.state.lock().counters.clone()
    }

    /// Timing summary of an operation, if any sample was recorded.
    #[must_use]
    pub fn timing(&self, name: &str) -> Option<TimingSummary> {
        self.state.lock().timings.get(name).copied()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &'static str) {
        let mut state = self.state.lock();
        let counter = state.counters.entry(name).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration) {
        let mut state = self.state.lock();
        let summary = state.timings.entry(name).or_default();
        summary.count = summary.count.saturating_add(1);
        summary.total = summary.total.saturating_add(elapsed);
        summary.max = summary.max.max(elapsed);
    }
}

/// Emits every sample as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &'static str) {
        tracing::debug!(target: "docline::metrics", counter = name, "increment");
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration) {
        tracing::debug!(
            target: "docline::metrics",
            timer = name,
            micros = elapsed.as_micros() as u64,
            "duration"
        );
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = InMemoryMetrics::new();
        metrics.increment(ADD_DOCUMENT);
        metrics.increment(ADD_DOCUMENT);
        metrics.increment(MIGRATE_FAILED);

        assert_eq!(metrics.counter(ADD_DOCUMENT), 2);
        assert_eq!(metrics.counter(MIGRATE_FAILED), 1);
        assert_eq!(metrics.counter(MIGRATE), 0);
        assert_eq!(metrics.counters().len(), 2);
    }

    #[test]
    fn timings_track_count_total_and_max() {
        let metrics = InMemoryMetrics::new();
        metrics.record_duration(VALIDATE_CYCLE_CHECK, Duration::from_millis(3));
        metrics.record_duration(VALIDATE_CYCLE_CHECK, Duration::from_millis(7));

        let summary = metrics.timing(VALIDATE_CYCLE_CHECK).expect("recorded");
        assert_eq!(summary.count, 2);
        assert_eq!(summary.total, Duration::from_millis(10));
        assert_eq!(summary.max, Duration::from_millis(7));
        assert!(metrics.timing(MIGRATE).is_none());
    }

    #[test]
    fn outcome_picks_failure_counter() {
        let metrics = InMemoryMetrics::new();
        let failed: Result<(), &str> = Err("boom");
        record_outcome(&metrics, &failed, MIGRATE, MIGRATE_FAILED);
        record_outcome(&metrics, &Ok::<(), &str>(()), MIGRATE, MIGRATE_FAILED);
        assert_eq!(metrics.counter(MIGRATE), 1);
        assert_eq!(metrics.counter(MIGRATE_FAILED), 1);
    }

    #[test]
    fn timer_reports_once() {
        let metrics = InMemoryMetrics::new();
        Timer::start(VALIDATE_CYCLE_CHECK).finish(&metrics);
        assert_eq!(
            metrics.timing(VALIDATE_CYCLE_CHECK).map(|t| t.count),
            Some(1)
        );
    }
}
