//! Per-namespace cache statistics
//!
//! Counters live in the process that owns the [`Namespace`](crate::Namespace).
//! They are not written to the store, so processes sharing a Redis namespace
//! each see only their own hits and misses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of namespace activity
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups served from the store
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,

    /// Calls that bypassed the lookup because refresh was requested
    pub refreshes: u64,

    /// Successful result writes
    pub stores: u64,

    /// Result writes that failed after the function had run
    pub store_failures: u64,

    /// Number of times a wrapped function body actually ran
    pub executions: u64,

    /// Total time spent inside wrapped function bodies, in microseconds
    pub execution_micros: u64,
}

impl CacheStats {
    /// Cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Average time a wrapped body took to compute its result
    pub fn average_execution_time(&self) -> Duration {
        if self.executions == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.execution_micros / self.executions)
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, refreshes: {}, executions: {}, avg_exec: {:?}, store_failures: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.refreshes,
            self.executions,
            self.average_execution_time(),
            self.store_failures
        )
    }
}

/// Lock-free counters backing [`CacheStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    stores: AtomicU64,
    store_failures: AtomicU64,
    executions: AtomicU64,
    execution_micros: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution(&self, elapsed: Duration) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.execution_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            execution_micros: self.execution_micros.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
        assert_eq!(stats.average_execution_time(), Duration::ZERO);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.record_hit();
        recorder.record_miss();
        recorder.record_miss();
        recorder.record_execution(Duration::from_millis(4));
        recorder.record_execution(Duration::from_millis(2));
        recorder.record_store_failure();

        let stats = recorder.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.store_failures, 1);
        assert_eq!(stats.average_execution_time(), Duration::from_millis(3));
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("misses: 50"));
    }
}
