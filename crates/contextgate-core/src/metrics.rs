//! Per-run atomic counters for pipeline observability.
//!
//! Each run owns one [`Metrics`] handle, shared with its store and phase
//! executors. Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event; the scheduler does so at the end of every run and copies a
//! [`MetricsSnapshot`] into the run report.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lightweight atomic counters. No allocations, no locking.
#[derive(Debug, Default)]
pub struct Metrics {
    snapshots_committed: AtomicU64,
    forks_rebased: AtomicU64,
    gate_blocks: AtomicU64,
    contributions_dropped: AtomicU64,
    conflicts_raised: AtomicU64,
    agent_timeouts: AtomicU64,
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub snapshots_committed: u64,
    pub forks_rebased: u64,
    pub gate_blocks: u64,
    pub contributions_dropped: u64,
    pub conflicts_raised: u64,
    pub agent_timeouts: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_snapshots_committed(&self) {
        self.snapshots_committed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_committed", "counter incremented");
    }

    pub fn inc_forks_rebased(&self) {
        self.forks_rebased.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "forks_rebased", "counter incremented");
    }

    pub fn inc_gate_blocks(&self) {
        self.gate_blocks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "gate_blocks", "counter incremented");
    }

    pub fn inc_contributions_dropped(&self) {
        self.contributions_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "contributions_dropped", "counter incremented");
    }

    /// Add `n` newly raised conflicts.
    pub fn add_conflicts_raised(&self, n: u64) {
        self.conflicts_raised.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "conflicts_raised", n, "counter incremented");
    }

    pub fn inc_agent_timeouts(&self) {
        self.agent_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agent_timeouts", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            snapshots_committed: self.snapshots_committed.load(Ordering::Relaxed),
            forks_rebased: self.forks_rebased.load(Ordering::Relaxed),
            gate_blocks: self.gate_blocks.load(Ordering::Relaxed),
            contributions_dropped: self.contributions_dropped.load(Ordering::Relaxed),
            conflicts_raised: self.conflicts_raised.load(Ordering::Relaxed),
            agent_timeouts: self.agent_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event and return
    /// them.
    pub fn flush(&self, run_id: &str) -> MetricsSnapshot {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            run_id = %run_id,
            snapshots_committed = s.snapshots_committed,
            forks_rebased = s.forks_rebased,
            gate_blocks = s.gate_blocks,
            contributions_dropped = s.contributions_dropped,
            conflicts_raised = s.conflicts_raised,
            agent_timeouts = s.agent_timeouts,
        );
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_snapshots_committed();
        m.inc_snapshots_committed();
        m.add_conflicts_raised(3);
        m.inc_gate_blocks();
        m.inc_agent_timeouts();
        m.inc_contributions_dropped();
        m.inc_forks_rebased();

        let s = m.snapshot();
        assert_eq!(s.snapshots_committed, 2);
        assert_eq!(s.conflicts_raised, 3);
        assert_eq!(s.gate_blocks, 1);
        assert_eq!(s.agent_timeouts, 1);
        assert_eq!(s.contributions_dropped, 1);
        assert_eq!(s.forks_rebased, 1);
    }

    #[test]
    fn handles_are_independent() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.inc_gate_blocks();
        assert_eq!(a.flush("run-a").gate_blocks, 1);
        assert_eq!(b.flush("run-b"), MetricsSnapshot::default());
    }
}
