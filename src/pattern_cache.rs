//! The primary cache tier: `(pattern text, options)` → reference-counted
//! compiled artifact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::{Config, MapFlavor};
use crate::deferred::DeferredCache;
use crate::engine::Engine;
use crate::error::CompileError;
use crate::handle::{duration_to_ticks, PatternHandle};
use crate::hash;
use crate::metrics::{PatternCacheMetrics, PatternCacheSnapshot, TierGauges};
use crate::options::Options;

/// The two concurrent-map implementations a [`PatternCache`] can be backed
/// by, selected at construction time via [`Config::pattern_map_flavor`].
/// Both preserve the invariant that a hit increments the handle's refcount
/// while the lookup's own lock is still held.
enum MapBackend<A> {
    RwLock(RwLock<HashMap<u64, PatternHandle<A>>>),
    DashMap(DashMap<u64, PatternHandle<A>>),
}

impl<A> MapBackend<A> {
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

    /// Looks up `key`; on a hit, increments and touches the handle before
    /// the lookup's guard is dropped, then returns a clone.
    fn hit(&self, key: u64) -> Option<PatternHandle<A>> {
        match self {
            MapBackend::RwLock(m) => {
                let guard = m.read();
                guard.get(&key).map(|h| {
                    h.incr();
                    h.touch();
                    h.clone()
                })
            }
            MapBackend::DashMap(m) => m.get(&key).map(|h| {
                h.incr();
                h.touch();
                h.clone()
            }),
        }
    }

    /// Inserts `new_handle` under `key` unless an entry is already present
    /// (a concurrent compile raced ahead of this one), in which case the
    /// existing entry is hit instead and `new_handle` is discarded. Returns
    /// whichever handle the caller should use.
    fn insert_or_hit(&self, key: u64, new_handle: PatternHandle<A>) -> PatternHandle<A> {
        match self {
            MapBackend::RwLock(m) => {
                let mut guard = m.write();
                if let Some(existing) = guard.get(&key) {
                    existing.incr();
                    existing.touch();
                    return existing.clone();
                }
                guard.insert(key, new_handle.clone());
                new_handle
            }
            MapBackend::DashMap(m) => {
                use dashmap::mapref::entry::Entry;
                match m.entry(key) {
                    Entry::Occupied(entry) => {
                        let existing = entry.get();
                        existing.incr();
                        existing.touch();
                        existing.clone()
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(new_handle.clone());
                        new_handle
                    }
                }
            }
        }
    }

    /// Inserts `handle` under `key` only if the slot is currently vacant.
    /// Unlike [`insert_or_hit`](Self::insert_or_hit), an occupied slot is
    /// left completely untouched — its occupant is neither hit nor
    /// replaced — and `handle` is handed back to the caller so they can
    /// decide what to do with it.
    fn insert_if_vacant(&self, key: u64, handle: PatternHandle<A>) -> Option<PatternHandle<A>> {
        match self {
            MapBackend::RwLock(m) => {
                let mut guard = m.write();
                if guard.contains_key(&key) {
                    Some(handle)
                } else {
                    guard.insert(key, handle);
                    None
                }
            }
            MapBackend::DashMap(m) => {
                use dashmap::mapref::entry::Entry;
                match m.entry(key) {
                    Entry::Occupied(_) => Some(handle),
                    Entry::Vacant(entry) => {
                        entry.insert(handle);
                        None
                    }
                }
            }
        }
    }

    fn retain(&self, mut f: impl FnMut(u64, &PatternHandle<A>) -> bool) {
        match self {
            MapBackend::RwLock(m) => m.write().retain(|k, v| f(*k, v)),
            MapBackend::DashMap(m) => m.retain(|k, v| f(*k, v)),
        }
    }

    fn for_each(&self, mut f: impl FnMut(u64, &PatternHandle<A>)) {
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

    fn remove(&self, key: u64) -> Option<PatternHandle<A>> {
        match self {
            MapBackend::RwLock(m) => m.write().remove(&key),
            MapBackend::DashMap(m) => m.remove(&key).map(|(_, v)| v),
        }
    }
}

/// The outcome of handing one capacity-pass candidate to
/// [`PatternCache::reclaim_candidate`].
#[derive(Debug, PartialEq, Eq)]
enum CapacityOutcome {
    /// Unreferenced; freed and its bytes released.
    Freed,
    /// Still referenced, and its slot was vacant; put back untouched.
    KeptInPlace,
    /// Still referenced, but its slot had since been taken by a fresh
    /// compile; handed to `DeferredCache` instead.
    Deferred,
}

/// The primary pattern cache: compiles on miss, shares a reference-counted
/// handle on hit, and evicts in the background rather than on the hot path.
pub struct PatternCache<E: Engine> {
    engine: E,
    backend: MapBackend<E::Artifact>,
    actual_size_bytes: AtomicUsize,
    target_capacity_bytes: u64,
    ttl: Duration,
    lru_batch_size: usize,
    metrics: PatternCacheMetrics,
}

impl<E: Engine> PatternCache<E> {
    pub fn new(engine: E, config: &Config) -> Self {
        Self {
            engine,
            backend: MapBackend::new(config.pattern_map_flavor),
            actual_size_bytes: AtomicUsize::new(0),
            target_capacity_bytes: config.pattern_target_capacity_bytes,
            ttl: config.pattern_ttl,
            lru_batch_size: config.pattern_lru_batch_size.max(1),
            metrics: PatternCacheMetrics::default(),
        }
    }

    /// Returns a handle to the compiled artifact for `(text, options)`,
    /// compiling it through the engine on a miss. The returned handle's
    /// refcount has already been incremented on the caller's behalf; the
    /// caller must eventually pass it to [`release`](Self::release).
    pub fn get_or_compile(
        &self,
        text: &str,
        options: &Options,
    ) -> Result<PatternHandle<E::Artifact>, CompileError> {
        let key = hash::pattern_key(text, options);

        if let Some(handle) = self.backend.hit(key) {
            self.metrics.counters.record_hit();
            return Ok(handle);
        }
        self.metrics.counters.record_miss();

        let artifact = self.engine.compile(text, options).map_err(|e| {
            self.metrics.compilation_errors.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        let size = self.engine.program_size(&artifact);
        let new_handle = PatternHandle::new(artifact, text.to_string(), options.clone(), size);

        let handle = self.backend.insert_or_hit(key, new_handle.clone());
        if handle.is_same_as(&new_handle) {
            self.actual_size_bytes.fetch_add(size, Ordering::Relaxed);
        }
        Ok(handle)
    }

    /// Decrements `handle`'s refcount. Consumes the handle so the caller
    /// cannot accidentally use it afterward.
    pub fn release(&self, handle: PatternHandle<E::Artifact>) {
        handle.decr();
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

    /// Runs one TTL pass followed by one capacity (LRU) pass. Handles past
    /// their TTL are freed if unreferenced, or moved into `deferred` if a
    /// caller still holds them. Returns the number of entries removed from
    /// this tier (freed or moved).
    pub fn evict(&self, now: u64, deferred: &DeferredCache<E::Artifact>) -> usize {
        let ttl_ticks = duration_to_ticks(self.ttl);
        let mut removed = 0usize;
        let mut to_defer: Vec<(u64, PatternHandle<E::Artifact>)> = Vec::new();

        self.backend.retain(|key, handle| {
            let age = now.saturating_sub(handle.last_access_ticks());
            if age <= ttl_ticks {
                return true;
            }

            let size = handle.approx_size_bytes();
            self.actual_size_bytes.fetch_sub(size, Ordering::Relaxed);
            if handle.refcount() <= 0 {
                self.metrics.counters.record_ttl_eviction(size as u64);
            } else {
                self.metrics
                    .entries_moved_to_deferred_ttl
                    .fetch_add(1, Ordering::Relaxed);
                to_defer.push((key, handle.clone()));
            }
            removed += 1;
            false
        });

        for (key, handle) in to_defer {
            deferred.add(key, handle);
        }

        removed += self.capacity_pass(deferred);
        removed
    }

    /// Evicts refcount == 0 entries, oldest-accessed first, in batches of
    /// `lru_batch_size`, until the tier is at or under its target capacity
    /// or no more unreferenced entries remain. Entries with refcount > 0 are
    /// ordinarily skipped entirely (only the TTL pass moves those to
    /// `deferred`; see the Open Question decision in `DESIGN.md`) — the
    /// exception is the narrow race handled by [`reclaim_candidate`].
    ///
    /// [`reclaim_candidate`]: Self::reclaim_candidate
    fn capacity_pass(&self, deferred: &DeferredCache<E::Artifact>) -> usize {
        let mut removed = 0usize;
        loop {
            if self.actual_size_bytes.load(Ordering::Relaxed) as u64 <= self.target_capacity_bytes {
                break;
            }

            let mut candidates: Vec<(u64, u64)> = Vec::new();
            self.backend.for_each(|key, handle| {
                if handle.refcount() <= 0 {
                    candidates.push((key, handle.last_access_ticks()));
                }
            });
            if candidates.is_empty() {
                break;
            }
            candidates.sort_by_key(|&(_, last_access)| last_access);

            let mut reclaimed_this_round = 0usize;
            for (key, _) in candidates.into_iter().take(self.lru_batch_size) {
                let Some(handle) = self.backend.remove(key) else {
                    continue;
                };
                match self.reclaim_candidate(key, handle, deferred) {
                    CapacityOutcome::Freed | CapacityOutcome::Deferred => {
                        removed += 1;
                        reclaimed_this_round += 1;
                    }
                    CapacityOutcome::KeptInPlace => {}
                }
            }
            if reclaimed_this_round == 0 {
                break;
            }
        }
        removed
    }

    /// Disposes of one candidate the capacity pass already pulled off the
    /// map. A candidate was observed with `refcount == 0` at collection
    /// time, but that can go stale by the time it's actually removed:
    ///
    /// - Still unreferenced: free it.
    /// - A concurrent hit bumped its refcount before the removal, and its
    ///   slot is still empty: put it straight back, untouched.
    /// - A concurrent hit bumped its refcount *and* a concurrent miss has
    ///   since recompiled and inserted a fresh handle under the same key:
    ///   the old slot is no longer ours to put the handle back into. Rather
    ///   than silently dropping a still-referenced handle (which would
    ///   leave the leak detector blind to it), hand it to `deferred`, the
    ///   same as the TTL pass would.
    fn reclaim_candidate(
        &self,
        key: u64,
        handle: PatternHandle<E::Artifact>,
        deferred: &DeferredCache<E::Artifact>,
    ) -> CapacityOutcome {
        if handle.refcount() <= 0 {
            let size = handle.approx_size_bytes();
            self.actual_size_bytes.fetch_sub(size, Ordering::Relaxed);
            self.metrics.counters.record_lru_eviction(size as u64);
            return CapacityOutcome::Freed;
        }

        let size = handle.approx_size_bytes();
        match self.backend.insert_if_vacant(key, handle) {
            None => CapacityOutcome::KeptInPlace,
            Some(handle) => {
                self.actual_size_bytes.fetch_sub(size, Ordering::Relaxed);
                self.metrics
                    .entries_moved_to_deferred_lru
                    .fetch_add(1, Ordering::Relaxed);
                deferred.add(key, handle);
                CapacityOutcome::Deferred
            }
        }
    }

    /// Empties the tier. Unreferenced entries are freed; still-referenced
    /// entries are moved into `deferred`, exactly as the TTL pass would.
    pub fn clear(&self, deferred: &DeferredCache<E::Artifact>) {
        let mut to_defer: Vec<(u64, PatternHandle<E::Artifact>)> = Vec::new();
        self.backend.retain(|key, handle| {
            if handle.refcount() > 0 {
                to_defer.push((key, handle.clone()));
            }
            false
        });
        self.actual_size_bytes.store(0, Ordering::Relaxed);
        for (key, handle) in to_defer {
            deferred.add(key, handle);
        }
    }

    pub fn snapshot(&self) -> PatternCacheSnapshot {
        let gauges = TierGauges {
            entry_count: self.backend.len() as u64,
            actual_size_bytes: self.actual_size_bytes(),
            target_capacity_bytes: self.target_capacity_bytes,
        };
        self.metrics.snapshot(gauges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StdRegexEngine;

    fn cache(target_capacity_bytes: u64) -> PatternCache<StdRegexEngine> {
        let mut config = Config::default();
        config.pattern_target_capacity_bytes = target_capacity_bytes;
        config.pattern_ttl = Duration::from_secs(3600);
        PatternCache::new(StdRegexEngine, &config)
    }

    #[test]
    fn identical_pattern_and_options_are_deduplicated() {
        let cache = cache(1 << 20);
        let a = cache.get_or_compile("a+b*", &Options::default()).unwrap();
        let b = cache.get_or_compile("a+b*", &Options::default()).unwrap();
        assert!(a.is_same_as(&b));
        assert_eq!(a.refcount(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.snapshot().counters.hits, 1);
        assert_eq!(cache.snapshot().counters.misses, 1);
    }

    #[test]
    fn differing_options_partition_the_same_pattern_text() {
        let cache = cache(1 << 20);
        let mut other = Options::default();
        other.case_sensitive = false;

        let a = cache.get_or_compile("abc", &Options::default()).unwrap();
        let b = cache.get_or_compile("abc", &other).unwrap();
        assert!(!a.is_same_as(&b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn release_decrements_refcount() {
        let cache = cache(1 << 20);
        let handle = cache.get_or_compile("a+", &Options::default()).unwrap();
        assert_eq!(handle.refcount(), 1);
        cache.release(handle);
        // the in-map copy's refcount reflects the decrement
        let again = cache.get_or_compile("a+", &Options::default()).unwrap();
        assert_eq!(again.refcount(), 1);
    }

    #[test]
    fn compile_errors_are_propagated_and_counted() {
        let cache = cache(1 << 20);
        let err = cache.get_or_compile("a(", &Options::default()).unwrap_err();
        assert_eq!(err.kind, crate::error::CompileErrorKind::Syntax);
        assert_eq!(cache.snapshot().compilation_errors, 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn expired_unreferenced_entries_are_freed_on_evict() {
        let mut config = Config::default();
        config.pattern_ttl = Duration::from_millis(0);
        config.pattern_target_capacity_bytes = 1 << 20;
        let cache = PatternCache::new(StdRegexEngine, &config);
        let deferred = DeferredCache::new(Duration::from_secs(60));

        let handle = cache.get_or_compile("a+", &Options::default()).unwrap();
        cache.release(handle);
        std::thread::sleep(Duration::from_millis(2));

        let removed = cache.evict(crate::handle::now_ticks(), &deferred);
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 0);
        assert_eq!(deferred.len(), 0);
    }

    #[test]
    fn expired_referenced_entries_move_to_deferred() {
        let mut config = Config::default();
        config.pattern_ttl = Duration::from_millis(0);
        config.pattern_target_capacity_bytes = 1 << 20;
        let cache = PatternCache::new(StdRegexEngine, &config);
        let deferred = DeferredCache::new(Duration::from_secs(60));

        let handle = cache.get_or_compile("a+", &Options::default()).unwrap();
        std::thread::sleep(Duration::from_millis(2));

        let removed = cache.evict(crate::handle::now_ticks(), &deferred);
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 0);
        assert_eq!(deferred.len(), 1);
        assert_eq!(handle.refcount(), 1);
    }

    #[test]
    fn capacity_pass_converges_to_target_when_entries_are_unreferenced() {
        let mut config = Config::default();
        config.pattern_ttl = Duration::from_secs(3600);
        config.pattern_target_capacity_bytes = 1;
        config.pattern_lru_batch_size = 2;
        let cache = PatternCache::new(StdRegexEngine, &config);
        let deferred = DeferredCache::new(Duration::from_secs(60));

        for i in 0..5 {
            let handle = cache
                .get_or_compile(&format!("pattern-{i}"), &Options::default())
                .unwrap();
            cache.release(handle);
        }
        assert_eq!(cache.len(), 5);

        cache.evict(crate::handle::now_ticks(), &deferred);
        assert_eq!(cache.len(), 0);
        assert!(cache.actual_size_bytes() <= 1);
    }

    #[test]
    fn capacity_pass_never_evicts_referenced_entries() {
        let mut config = Config::default();
        config.pattern_ttl = Duration::from_secs(3600);
        config.pattern_target_capacity_bytes = 1;
        let cache = PatternCache::new(StdRegexEngine, &config);
        let deferred = DeferredCache::new(Duration::from_secs(60));

        let kept = cache.get_or_compile("kept", &Options::default()).unwrap();
        let transient = cache.get_or_compile("transient", &Options::default()).unwrap();
        cache.release(transient);

        cache.evict(crate::handle::now_ticks(), &deferred);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.snapshot().entries_moved_to_deferred_lru, 0);
        drop(kept);
    }

    #[test]
    fn insert_if_vacant_leaves_an_occupied_slot_untouched() {
        let backend: MapBackend<&'static str> = MapBackend::new(MapFlavor::RwLock);
        let first = PatternHandle::new("art-a", "a".to_string(), Options::default(), 1);
        backend.insert_or_hit(1, first.clone());

        let second = PatternHandle::new("art-b", "b".to_string(), Options::default(), 1);
        let bounced = backend.insert_if_vacant(1, second.clone());
        assert!(bounced.is_some());
        assert!(bounced.unwrap().is_same_as(&second));
        // the occupant was not hit: its refcount is untouched by the attempt
        assert_eq!(first.refcount(), 1);

        let vacant = backend.insert_if_vacant(2, second.clone());
        assert!(vacant.is_none());
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn capacity_pass_defers_a_still_referenced_handle_whose_slot_was_stolen_by_a_recompile() {
        let mut config = Config::default();
        config.pattern_ttl = Duration::from_secs(3600);
        config.pattern_target_capacity_bytes = 1 << 20;
        let cache = PatternCache::new(StdRegexEngine, &config);
        let deferred = DeferredCache::new(Duration::from_secs(60));

        // Simulate the race directly: a candidate pulled off the map by the
        // capacity pass (refcount == 0 at collection time) that has since
        // been re-referenced, while a concurrent miss has already recompiled
        // and installed a fresh handle under the same key.
        let key = hash::pattern_key("raced", &Options::default());
        let fresh = cache.get_or_compile("raced", &Options::default()).unwrap();
        assert_eq!(cache.len(), 1);

        let stale = cache.engine.compile("raced", &Options::default()).unwrap();
        let stale_size = cache.engine.program_size(&stale);
        let stale_handle = PatternHandle::new(stale, "raced".to_string(), Options::default(), stale_size);
        stale_handle.incr();
        assert!(stale_handle.refcount() > 0);

        let outcome = cache.reclaim_candidate(key, stale_handle.clone(), &deferred);
        assert_eq!(outcome, CapacityOutcome::Deferred);
        assert_eq!(deferred.len(), 1);
        assert_eq!(cache.snapshot().entries_moved_to_deferred_lru, 1);

        // the fresh handle under the same key is untouched and still servable
        assert_eq!(cache.len(), 1);
        let again = cache.get_or_compile("raced", &Options::default()).unwrap();
        assert!(again.is_same_as(&fresh));

        drop(fresh);
        drop(again);
        stale_handle.decr();
    }

    #[test]
    fn concurrent_misses_for_the_same_key_collapse_to_one_compile() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(cache(1 << 20));
        let mut handles = vec![];
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                cache.get_or_compile("shared+pattern*", &Options::default()).unwrap()
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let first = &results[0];
        for other in &results[1..] {
            assert!(first.is_same_as(other));
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(first.refcount(), 8);
    }

    #[test]
    fn clear_moves_referenced_entries_to_deferred_and_frees_the_rest() {
        let cache = cache(1 << 20);
        let deferred = DeferredCache::new(Duration::from_secs(60));

        let kept = cache.get_or_compile("kept", &Options::default()).unwrap();
        let transient = cache.get_or_compile("transient", &Options::default()).unwrap();
        cache.release(transient);

        cache.clear(&deferred);
        assert_eq!(cache.len(), 0);
        assert_eq!(deferred.len(), 1);
        assert_eq!(cache.actual_size_bytes(), 0);
        drop(kept);
    }

    #[test]
    fn dashmap_flavor_behaves_identically_to_rwlock_flavor() {
        let mut config = Config::default();
        config.pattern_map_flavor = MapFlavor::DashMap;
        config.pattern_target_capacity_bytes = 1 << 20;
        let cache = PatternCache::new(StdRegexEngine, &config);

        let a = cache.get_or_compile("x+y*", &Options::default()).unwrap();
        let b = cache.get_or_compile("x+y*", &Options::default()).unwrap();
        assert!(a.is_same_as(&b));
        assert_eq!(cache.len(), 1);
    }
}
