//! The memoization tier: `(pattern hash, input hash)` → last match result.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::{Config, MapFlavor};
use crate::handle::{duration_to_ticks, now_ticks};
use crate::hash;
use crate::metrics::{ResultCacheMetrics, ResultCacheSnapshot, TierGauges};

/// Every result-cache entry is a single bit plus a timestamp; this is a
/// fixed approximation of its footprint (key + bool + timestamp, rounded up
/// to a plausible allocator bucket) used for capacity accounting, since the
/// entries have no engine-reported size the way pattern artifacts do.
const APPROX_ENTRY_SIZE_BYTES: u64 = 64;

struct ResultEntry {
    match_result: bool,
    last_access: AtomicU64,
}

impl ResultEntry {
    fn new(match_result: bool) -> Self {
        Self {
            match_result,
            last_access: AtomicU64::new(now_ticks()),
        }
    }

    fn touch(&self) {
        self.last_access.store(now_ticks(), Ordering::Release);
    }
}

/// The outcome of a [`ResultCache::get`] lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultLookup {
    Hit(bool),
    Miss,
    /// The lookup was never attempted because the cache is disabled or the
    /// input exceeds the configured size threshold.
    AbsentByPolicy,
}

enum MapBackend {
    RwLock(RwLock<HashMap<u64, ResultEntry>>),
    DashMap(DashMap<u64, ResultEntry>),
}

impl MapBackend {
    fn new(flavor: MapFlavor) -> Self {
        match flavor {
            MapFlavor::RwLock => MapBackend::RwLock(RwLock::new(HashMap::new())),
            MapFlavor::DashMap => MapBackend::DashMap(DashMap::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            MapBackend::RwLock(m) => m.read().len(),
            MapBackend::DashMap(m) => m.len(),
        }
    }

    fn get(&self, key: u64) -> Option<bool> {
        match self {
            MapBackend::RwLock(m) => m.read().get(&key).map(|e| {
                e.touch();
                e.match_result
            }),
            MapBackend::DashMap(m) => m.get(&key).map(|e| {
                e.touch();
                e.match_result
            }),
        }
    }

    /// Inserts or updates `key`. Returns `Some(previous)` if an entry
    /// already existed (so the caller can detect a flip).
    fn put(&self, key: u64, match_result: bool) -> Option<bool> {
        match self {
            MapBackend::RwLock(m) => {
                let mut guard = m.write();
                if let Some(existing) = guard.get(&key) {
                    let previous = existing.match_result;
                    existing.touch();
                    if previous != match_result {
                        guard.insert(key, ResultEntry::new(match_result));
                    }
                    Some(previous)
                } else {
                    guard.insert(key, ResultEntry::new(match_result));
                    None
                }
            }
            MapBackend::DashMap(m) => {
                use dashmap::mapref::entry::Entry;
                match m.entry(key) {
                    Entry::Occupied(mut entry) => {
                        let previous = entry.get().match_result;
                        if previous != match_result {
                            entry.insert(ResultEntry::new(match_result));
                        } else {
                            entry.get().touch();
                        }
                        Some(previous)
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(ResultEntry::new(match_result));
                        None
                    }
                }
            }
        }
    }

    fn retain(&self, mut f: impl FnMut(&ResultEntry) -> bool) {
        match self {
            MapBackend::RwLock(m) => m.write().retain(|_, v| f(v)),
            MapBackend::DashMap(m) => m.retain(|_, v| f(v)),
        }
    }

    fn for_each(&self, mut f: impl FnMut(u64, &ResultEntry)) {
        match self {
            MapBackend::RwLock(m) => {
                for (k, v) in m.read().iter() {
                    f(*k, v);
                }
            }
            MapBackend::DashMap(m) => {
                for entry in m.iter() {
                    f(*entry.key(), entry.value());
                }
            }
        }
    }

    fn remove(&self, key: u64) -> bool {
        match self {
            MapBackend::RwLock(m) => m.write().remove(&key).is_some(),
            MapBackend::DashMap(m) => m.remove(&key).is_some(),
        }
    }

    fn clear(&self) {
        match self {
            MapBackend::RwLock(m) => m.write().clear(),
            MapBackend::DashMap(m) => m.clear(),
        }
    }
}

/// A bounded memoization cache from `(pattern hash, input)` to the last
/// match outcome observed for that pair.
pub struct ResultCache {
    backend: MapBackend,
    enabled: bool,
    input_threshold_bytes: u64,
    target_capacity_bytes: u64,
    ttl: Duration,
    lru_batch_size: usize,
    actual_size_bytes: AtomicUsize,
    metrics: ResultCacheMetrics,
}

impl ResultCache {
    pub fn new(config: &Config) -> Self {
        Self {
            backend: MapBackend::new(config.result_map_flavor),
            enabled: config.result_enabled,
            input_threshold_bytes: config.result_input_threshold_bytes,
            target_capacity_bytes: config.result_target_capacity_bytes,
            ttl: config.result_ttl,
            lru_batch_size: config.result_lru_batch_size.max(1),
            actual_size_bytes: AtomicUsize::new(0),
            metrics: ResultCacheMetrics::default(),
        }
    }

    fn admissible(&self, input: &[u8]) -> bool {
        self.enabled && (input.len() as u64) <= self.input_threshold_bytes
    }

    pub fn get(&self, pattern_hash: u64, input: &[u8]) -> ResultLookup {
        if !self.admissible(input) {
            return ResultLookup::AbsentByPolicy;
        }
        let key = hash::result_key(pattern_hash, input);
        match catch_unwind(AssertUnwindSafe(|| self.backend.get(key))) {
            Ok(Some(result)) => {
                self.metrics.counters.record_hit();
                ResultLookup::Hit(result)
            }
            Ok(None) => {
                self.metrics.counters.record_miss();
                ResultLookup::Miss
            }
            Err(panic) => {
                tracing::error!(?panic, "result cache lookup failed unexpectedly");
                self.metrics.get_errors.fetch_add(1, Ordering::Relaxed);
                ResultLookup::Miss
            }
        }
    }

    pub fn put(&self, pattern_hash: u64, input: &[u8], result: bool) {
        if !self.admissible(input) {
            self.metrics.oversized_skips.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let key = hash::result_key(pattern_hash, input);
        match catch_unwind(AssertUnwindSafe(|| self.backend.put(key, result))) {
            Ok(None) => {
                self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
                self.actual_size_bytes
                    .fetch_add(APPROX_ENTRY_SIZE_BYTES as usize, Ordering::Relaxed);
            }
            Ok(Some(previous)) => {
                self.metrics.updates.fetch_add(1, Ordering::Relaxed);
                if previous != result {
                    self.metrics.result_flips.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(panic) => {
                tracing::error!(?panic, "result cache update failed unexpectedly");
                self.metrics.put_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn actual_size_bytes(&self) -> u64 {
        self.actual_size_bytes.load(Ordering::Relaxed) as u64
    }

    /// Runs a TTL pass followed by a capacity (LRU) pass. Returns the
    /// number of entries removed.
    pub fn evict(&self, now: u64) -> usize {
        let ttl_ticks = duration_to_ticks(self.ttl);
        let mut removed = 0usize;
        self.backend.retain(|entry| {
            let age = now.saturating_sub(entry.last_access.load(Ordering::Acquire));
            if age > ttl_ticks {
                self.actual_size_bytes
                    .fetch_sub(APPROX_ENTRY_SIZE_BYTES as usize, Ordering::Relaxed);
                self.metrics.counters.record_ttl_eviction(APPROX_ENTRY_SIZE_BYTES);
                removed += 1;
                false
            } else {
                true
            }
        });

        removed += self.capacity_pass();
        removed
    }

    fn capacity_pass(&self) -> usize {
        let mut removed = 0usize;
        loop {
            if self.actual_size_bytes.load(Ordering::Relaxed) as u64 <= self.target_capacity_bytes {
                break;
            }
            let mut candidates: Vec<(u64, u64)> = Vec::new();
            self.backend
                .for_each(|key, entry| candidates.push((key, entry.last_access.load(Ordering::Acquire))));
            if candidates.is_empty() {
                break;
            }
            candidates.sort_by_key(|&(_, last_access)| last_access);

            let mut evicted_this_round = 0usize;
            for (key, _) in candidates.into_iter().take(self.lru_batch_size) {
                if self.backend.remove(key) {
                    self.actual_size_bytes
                        .fetch_sub(APPROX_ENTRY_SIZE_BYTES as usize, Ordering::Relaxed);
                    self.metrics.counters.record_lru_eviction(APPROX_ENTRY_SIZE_BYTES);
                    removed += 1;
                    evicted_this_round += 1;
                }
            }
            if evicted_this_round == 0 {
                break;
            }
        }
        removed
    }

    pub fn clear(&self) {
        self.backend.clear();
        self.actual_size_bytes.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResultCacheSnapshot {
        let gauges = TierGauges {
            entry_count: self.backend.len() as u64,
            actual_size_bytes: self.actual_size_bytes(),
            target_capacity_bytes: self.target_capacity_bytes,
        };
        self.metrics.snapshot(gauges)
    }
}
