//! The holding area for pattern handles evicted from [`PatternCache`] while
//! still referenced by a caller.
//!
//! [`PatternCache`]: crate::pattern_cache::PatternCache

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::handle::{duration_to_ticks, now_ticks, PatternHandle};
use crate::metrics::{DeferredCacheMetrics, DeferredCacheSnapshot};

struct DeferredEntry<A> {
    handle: PatternHandle<A>,
    entered_deferred: u64,
    size_at_admission: usize,
}

/// A secondary tier that keeps evicted-but-in-use handles alive until their
/// refcount reaches zero (normal path) or a forced TTL elapses (leak path).
pub struct DeferredCache<A> {
    entries: RwLock<HashMap<u64, DeferredEntry<A>>>,
    actual_size_bytes: AtomicUsize,
    ttl: Duration,
    metrics: DeferredCacheMetrics,
}

impl<A> DeferredCache<A> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            actual_size_bytes: AtomicUsize::new(0),
            ttl,
            metrics: DeferredCacheMetrics::default(),
        }
    }

    /// Moves a handle into the deferred tier. A no-op if the key is already
    /// present (can happen if a handle somehow reaches the deferred tier
    /// twice under the same key, which the pattern cache's eviction pass
    /// does not do, but is harmless to guard against).
    pub fn add(&self, key: u64, handle: PatternHandle<A>) {
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return;
        }
        let size = handle.approx_size_bytes();
        self.actual_size_bytes.fetch_add(size, Ordering::Relaxed);
        entries.insert(
            key,
            DeferredEntry {
                handle,
                entered_deferred: now_ticks(),
                size_at_admission: size,
            },
        );
    }

    /// Sweeps the deferred tier: frees any entry whose refcount has reached
    /// zero, and forcibly frees any entry that has outlived `ttl` regardless
    /// of refcount, logging a leak warning for the latter. Returns the
    /// number of entries removed.
    pub fn evict(&self, now: u64) -> usize {
        let ttl_ticks = duration_to_ticks(self.ttl);
        let mut removed = 0usize;
        let mut entries = self.entries.write();
        entries.retain(|_, entry| {
            if entry.handle.refcount() <= 0 {
                self.actual_size_bytes
                    .fetch_sub(entry.size_at_admission, Ordering::Relaxed);
                self.metrics.immediate_evictions.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .immediate_bytes_freed
                    .fetch_add(entry.size_at_admission as u64, Ordering::Relaxed);
                removed += 1;
                return false;
            }

            let age = now.saturating_sub(entry.entered_deferred);
            if age > ttl_ticks {
                tracing::warn!(
                    pattern = entry.handle.pattern_text(),
                    refcount = entry.handle.refcount(),
                    age_ns = age,
                    "forcibly evicting a pattern handle from the deferred cache; a caller likely \
                     never released it"
                );
                self.actual_size_bytes
                    .fetch_sub(entry.size_at_admission, Ordering::Relaxed);
                self.metrics.forced_evictions.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .forced_bytes_freed
                    .fetch_add(entry.size_at_admission as u64, Ordering::Relaxed);
                removed += 1;
                return false;
            }

            true
        });
        removed
    }

    /// Drops every entry unconditionally, regardless of refcount. See the
    /// Open Question decision in `DESIGN.md`.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.actual_size_bytes.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn actual_size_bytes(&self) -> u64 {
        self.actual_size_bytes.load(Ordering::Relaxed) as u64
    }

    pub fn snapshot(&self) -> DeferredCacheSnapshot {
        self.metrics
            .snapshot(self.len() as u64, self.actual_size_bytes())
    }
}
