//! Global atomic counters for reward engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    evaluations: AtomicU64,
    rule_invocations: AtomicU64,
    sandbox_calls: AtomicU64,
    sandbox_timeouts: AtomicU64,
    transport_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            rule_invocations: AtomicU64::new(0),
            sandbox_calls: AtomicU64::new(0),
            sandbox_timeouts: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations", "counter incremented");
    }

    pub fn inc_rule_invocations(&self) {
        self.rule_invocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rule_invocations", "counter incremented");
    }

    pub fn inc_sandbox_calls(&self) {
        self.sandbox_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sandbox_calls", "counter incremented");
    }

    pub fn inc_sandbox_timeouts(&self) {
        self.sandbox_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sandbox_timeouts", "counter incremented");
    }

    /// Sandbox requests that never produced a usable answer.
    pub fn inc_transport_failures(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "transport_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            rule_invocations = self.rule_invocations(),
            sandbox_calls = self.sandbox_calls(),
            sandbox_timeouts = self.sandbox_timeouts(),
            transport_failures = self.transport_failures(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn rule_invocations(&self) -> u64 {
        self.rule_invocations.load(Ordering::Relaxed)
    }

    pub fn sandbox_calls(&self) -> u64 {
        self.sandbox_calls.load(Ordering::Relaxed)
    }

    pub fn sandbox_timeouts(&self) -> u64 {
        self.sandbox_timeouts.load(Ordering::Relaxed)
    }

    pub fn transport_failures(&self) -> u64 {
        self.transport_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.rule_invocations.store(0, Ordering::Relaxed);
        self.sandbox_calls.store(0, Ordering::Relaxed);
        self.sandbox_timeouts.store(0, Ordering::Relaxed);
        self.transport_failures.store(0, Ordering::Relaxed);
    }
}
