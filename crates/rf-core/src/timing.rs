//! Latency accounting for periodic work.
//!
//! The sampling thread records how long each tick took; readers on other
//! threads take a snapshot without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Accumulates per-call durations and counts calls that overran a budget.
pub struct LatencyTracker {
    total_ns: AtomicU64,
    max_ns: AtomicU64,
    count: AtomicU64,
    overruns: AtomicU64,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTracker {
    pub const fn new() -> Self {
        Self {
            total_ns: AtomicU64::new(0),
            max_ns: AtomicU64::new(0),
            count: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    /// Record one call. Returns `true` if it exceeded `budget`.
    pub fn record(&self, elapsed: Duration, budget: Duration) -> bool {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.max_ns.fetch_max(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let overran = elapsed > budget;
        if overran {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        overran
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> LatencyStats {
        let count = self.count();
        let total_ns = self.total_ns.load(Ordering::Relaxed);
        LatencyStats {
            count,
            overruns: self.overruns.load(Ordering::Relaxed),
            mean: if count > 0 {
                Duration::from_nanos(total_ns / count)
            } else {
                Duration::ZERO
            },
            max: Duration::from_nanos(self.max_ns.load(Ordering::Relaxed)),
        }
    }

    pub fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a [`LatencyTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyStats {
    pub count: u64,
    pub overruns: u64,
    pub mean: Duration,
    pub max: Duration,
}
