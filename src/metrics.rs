//! Atomic, per-tier counters and the aggregated snapshot exposed by
//! [`CacheManager::metrics_snapshot`].
//!
//! Modeled directly on the teacher's `CacheStats`: plain atomics at
//! `Relaxed` ordering for counters nobody needs to synchronize against, and
//! a `Clone` impl that snapshots the current values into fresh atomics
//! rather than sharing them.
//!
//! [`CacheManager::metrics_snapshot`]: crate::manager::CacheManager::metrics_snapshot

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters common to all three tiers.
#[derive(Debug, Default)]
pub struct TierCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub ttl_evictions: AtomicU64,
    pub lru_evictions: AtomicU64,
    pub bytes_freed: AtomicU64,
}

impl TierCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ttl_eviction(&self, bytes: u64) {
        self.ttl_evictions.fetch_add(1, Ordering::Relaxed);
        self.bytes_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_lru_eviction(&self, bytes: u64) {
        self.lru_evictions.fetch_add(1, Ordering::Relaxed);
        self.bytes_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TierCountersSnapshot {
        TierCountersSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_evictions: self.ttl_evictions.load(Ordering::Relaxed),
            lru_evictions: self.lru_evictions.load(Ordering::Relaxed),
            bytes_freed: self.bytes_freed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TierCountersSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub ttl_evictions: u64,
    pub lru_evictions: u64,
    pub bytes_freed: u64,
}

impl TierCountersSnapshot {
    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Gauges sampled at snapshot time rather than tracked incrementally.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TierGauges {
    pub entry_count: u64,
    pub actual_size_bytes: u64,
    pub target_capacity_bytes: u64,
}

impl TierGauges {
    pub fn utilization(&self) -> f64 {
        if self.target_capacity_bytes == 0 {
            0.0
        } else {
            self.actual_size_bytes as f64 / self.target_capacity_bytes as f64
        }
    }
}

/// Metrics for [`PatternCache`](crate::pattern_cache::PatternCache).
#[derive(Debug, Default)]
pub struct PatternCacheMetrics {
    pub counters: TierCounters,
    pub compilation_errors: AtomicU64,
    pub entries_moved_to_deferred_ttl: AtomicU64,
    /// Counts a narrow capacity-pass race, not a deliberate eviction policy:
    /// see the Open Question decision in `DESIGN.md`.
    pub entries_moved_to_deferred_lru: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PatternCacheSnapshot {
    pub counters: TierCountersSnapshot,
    pub gauges: TierGauges,
    pub compilation_errors: u64,
    pub entries_moved_to_deferred_ttl: u64,
    pub entries_moved_to_deferred_lru: u64,
}

impl PatternCacheMetrics {
    pub fn snapshot(&self, gauges: TierGauges) -> PatternCacheSnapshot {
        PatternCacheSnapshot {
            counters: self.counters.snapshot(),
            gauges,
            compilation_errors: self.compilation_errors.load(Ordering::Relaxed),
            entries_moved_to_deferred_ttl: self.entries_moved_to_deferred_ttl.load(Ordering::Relaxed),
            entries_moved_to_deferred_lru: self.entries_moved_to_deferred_lru.load(Ordering::Relaxed),
        }
    }
}

/// Metrics for [`ResultCache`](crate::result_cache::ResultCache).
#[derive(Debug, Default)]
pub struct ResultCacheMetrics {
    pub counters: TierCounters,
    pub inserts: AtomicU64,
    pub updates: AtomicU64,
    pub result_flips: AtomicU64,
    pub oversized_skips: AtomicU64,
    pub get_errors: AtomicU64,
    pub put_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResultCacheSnapshot {
    pub counters: TierCountersSnapshot,
    pub gauges: TierGauges,
    pub inserts: u64,
    pub updates: u64,
    pub result_flips: u64,
    pub oversized_skips: u64,
    pub get_errors: u64,
    pub put_errors: u64,
}

impl ResultCacheMetrics {
    pub fn snapshot(&self, gauges: TierGauges) -> ResultCacheSnapshot {
        ResultCacheSnapshot {
            counters: self.counters.snapshot(),
            gauges,
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            result_flips: self.result_flips.load(Ordering::Relaxed),
            oversized_skips: self.oversized_skips.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
            put_errors: self.put_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics for [`DeferredCache`](crate::deferred::DeferredCache).
#[derive(Debug, Default)]
pub struct DeferredCacheMetrics {
    pub immediate_evictions: AtomicU64,
    pub immediate_bytes_freed: AtomicU64,
    pub forced_evictions: AtomicU64,
    pub forced_bytes_freed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeferredCacheSnapshot {
    pub entry_count: u64,
    pub actual_size_bytes: u64,
    pub immediate_evictions: u64,
    pub immediate_bytes_freed: u64,
    pub forced_evictions: u64,
    pub forced_bytes_freed: u64,
}

impl DeferredCacheMetrics {
    pub fn snapshot(&self, entry_count: u64, actual_size_bytes: u64) -> DeferredCacheSnapshot {
        DeferredCacheSnapshot {
            entry_count,
            actual_size_bytes,
            immediate_evictions: self.immediate_evictions.load(Ordering::Relaxed),
            immediate_bytes_freed: self.immediate_bytes_freed.load(Ordering::Relaxed),
            forced_evictions: self.forced_evictions.load(Ordering::Relaxed),
            forced_bytes_freed: self.forced_bytes_freed.load(Ordering::Relaxed),
        }
    }
}

/// An aggregated, point-in-time view of every tier's metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsBundle {
    pub pattern_cache: PatternCacheSnapshot,
    pub result_cache: ResultCacheSnapshot,
    pub deferred_cache: DeferredCacheSnapshot,
    /// Wall-clock time this bundle was assembled, in RFC 3339 (a profile of
    /// ISO-8601). For external observers only; eviction and capacity
    /// decisions are driven by the monotonic ticks in `handle`, never by
    /// this field.
    pub generated_at: String,
}

impl MetricsBundle {
    /// Renders the bundle as an opaque textual form (TOML), suitable for
    /// logging or export without committing to a stable schema.
    pub fn to_text(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("<metrics serialization failed: {e}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_counters_track_hits_and_misses() {
        let counters = TierCounters::default();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        let snap = counters.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate() - 0.6666).abs() < 0.001);
    }

    #[test]
    fn eviction_counters_accumulate_bytes() {
        let counters = TierCounters::default();
        counters.record_ttl_eviction(100);
        counters.record_lru_eviction(50);
        let snap = counters.snapshot();
        assert_eq!(snap.ttl_evictions, 1);
        assert_eq!(snap.lru_evictions, 1);
        assert_eq!(snap.bytes_freed, 150);
    }

    #[test]
    fn gauges_utilization_handles_zero_target() {
        let gauges = TierGauges::default();
        assert_eq!(gauges.utilization(), 0.0);
    }

    #[test]
    fn metrics_bundle_serializes_to_text() {
        let bundle = MetricsBundle::default();
        let text = bundle.to_text();
        assert!(text.contains("pattern_cache"));
    }

    #[test]
    fn concurrent_hit_recording_is_accurate() {
        use std::sync::Arc;
        use std::thread;

        let counters = Arc::new(TierCounters::default());
        let mut handles = vec![];
        for _ in 0..8 {
            let c = Arc::clone(&counters);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    c.record_hit();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.snapshot().hits, 1600);
    }
}
