//! Index metrics
//!
//! - Counters only, monotonic
//! - Relaxed atomics: exact totals, no cross-counter ordering

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of one index instance
#[derive(Debug, Default)]
pub struct IndexMetrics {
    /// Elements stored
    inserts: AtomicU64,
    /// Elements removed
    removes: AtomicU64,
    /// Lookup calls, including continuation pages
    lookups: AtomicU64,
    /// Bulk loads completed
    bulk_loads: AtomicU64,
    /// Bucket rebuilds
    resizes: AtomicU64,
    /// Inserts refused by the unique constraint
    unique_violations: AtomicU64,
    /// Inserts undone after a failure
    rollbacks: AtomicU64,
}

impl IndexMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_inserts(&self, count: u64) {
        self.inserts.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_removes(&self, count: u64) {
        self.removes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_lookups(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bulk_loads(&self) {
        self.bulk_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_resizes(&self, count: u64) {
        self.resizes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_unique_violations(&self) {
        self.unique_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IndexMetricsSnapshot {
        IndexMetricsSnapshot {
            inserts: self.inserts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            bulk_loads: self.bulk_loads.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
            unique_violations: self.unique_violations.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Current values as one JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexMetricsSnapshot {
    pub inserts: u64,
    pub removes: u64,
    pub lookups: u64,
    pub bulk_loads: u64,
    pub resizes: u64,
    pub unique_violations: u64,
    pub rollbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_zero() {
        assert_eq!(IndexMetrics::new().snapshot(), IndexMetricsSnapshot::default());
    }

    #[test]
    fn test_counters() {
        let metrics = IndexMetrics::new();
        metrics.add_inserts(3);
        metrics.add_removes(1);
        metrics.increment_lookups();
        metrics.increment_unique_violations();
        metrics.increment_rollbacks();
        metrics.add_resizes(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.inserts, 3);
        assert_eq!(snapshot.removes, 1);
        assert_eq!(snapshot.lookups, 1);
        assert_eq!(snapshot.unique_violations, 1);
        assert_eq!(snapshot.rollbacks, 1);
        assert_eq!(snapshot.resizes, 2);
    }

    #[test]
    fn test_to_json() {
        let metrics = IndexMetrics::new();
        metrics.add_inserts(42);
        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["inserts"], 42);
        assert_eq!(parsed["rollbacks"], 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(IndexMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.increment_lookups();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().lookups, 800);
    }
}
