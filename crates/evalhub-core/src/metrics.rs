//! Global atomic counters for evaluation activity.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when the binary exits).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    events_created: AtomicU64,
    evaluator_syncs: AtomicU64,
    criteria_syncs: AtomicU64,
    results_recorded: AtomicU64,
    rejected_writes: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            events_created: AtomicU64::new(0),
            evaluator_syncs: AtomicU64::new(0),
            criteria_syncs: AtomicU64::new(0),
            results_recorded: AtomicU64::new(0),
            rejected_writes: AtomicU64::new(0),
        }
    }

    pub fn inc_events_created(&self) {
        self.events_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "events_created", "counter incremented");
    }

    /// Counts committed evaluator syncs; no-op syncs are not counted.
    pub fn inc_evaluator_syncs(&self) {
        self.evaluator_syncs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluator_syncs", "counter incremented");
    }

    pub fn inc_criteria_syncs(&self) {
        self.criteria_syncs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "criteria_syncs", "counter incremented");
    }

    /// Add the number of result rows written by one submission.
    pub fn add_results_recorded(&self, rows: u64) {
        self.results_recorded.fetch_add(rows, Ordering::Relaxed);
        tracing::trace!(metric = "results_recorded", rows = rows, "counter incremented");
    }

    /// Locked, stale or otherwise refused writes.
    pub fn inc_rejected_writes(&self) {
        self.rejected_writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rejected_writes", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            events_created = self.events_created(),
            evaluator_syncs = self.evaluator_syncs(),
            criteria_syncs = self.criteria_syncs(),
            results_recorded = self.results_recorded(),
            rejected_writes = self.rejected_writes(),
        );
    }

    pub fn events_created(&self) -> u64 {
        self.events_created.load(Ordering::Relaxed)
    }

    pub fn evaluator_syncs(&self) -> u64 {
        self.evaluator_syncs.load(Ordering::Relaxed)
    }

    pub fn criteria_syncs(&self) -> u64 {
        self.criteria_syncs.load(Ordering::Relaxed)
    }

    pub fn results_recorded(&self) -> u64 {
        self.results_recorded.load(Ordering::Relaxed)
    }

    pub fn rejected_writes(&self) -> u64 {
        self.rejected_writes.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.events_created.store(0, Ordering::Relaxed);
        self.evaluator_syncs.store(0, Ordering::Relaxed);
        self.criteria_syncs.store(0, Ordering::Relaxed);
        self.results_recorded.store(0, Ordering::Relaxed);
        self.rejected_writes.store(0, Ordering::Relaxed);
    }
}
