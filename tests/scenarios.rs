//! Integration coverage for the testable scenarios the design is built
//! around, driven entirely through the public `CacheManager` API.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use retacon_cache::config::Config;
use retacon_cache::{CacheManager, Options, ResultLookup, StdRegexEngine};

fn init_logging() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn manager_without_auto_start() -> CacheManager<StdRegexEngine> {
    let mut config = Config::default();
    config.eviction_auto_start = false;
    CacheManager::new(StdRegexEngine, config)
}

/// S1: compiling the same pattern and options twice returns the same
/// compiled artifact rather than compiling it again.
#[test]
fn s1_identical_compiles_deduplicate() {
    init_logging();
    let manager = manager_without_auto_start();

    let first = manager.get_or_compile("[0-9]+", &Options::default()).unwrap();
    let second = manager.get_or_compile("[0-9]+", &Options::default()).unwrap();

    assert!(first.is_same_as(&second));
    assert_eq!(manager.metrics_snapshot().pattern_cache.counters.hits, 1);

    manager.release(first);
    manager.release(second);
}

/// S2: the same pattern text compiled under different options is kept as
/// two distinct cache entries, each independently addressable.
#[test]
fn s2_options_partition_the_same_text() {
    init_logging();
    let manager = manager_without_auto_start();

    let mut insensitive = Options::default();
    insensitive.case_sensitive = false;

    let sensitive_handle = manager.get_or_compile("abc", &Options::default()).unwrap();
    let insensitive_handle = manager.get_or_compile("abc", &insensitive).unwrap();

    assert!(!sensitive_handle.is_same_as(&insensitive_handle));
    assert!(!sensitive_handle.artifact().is_match("ABC"));
    assert!(insensitive_handle.artifact().is_match("ABC"));

    manager.release(sensitive_handle);
    manager.release(insensitive_handle);
}

/// S3: a handle still referenced by a caller when its TTL expires is moved
/// to the deferred tier rather than freed, and is only freed once the
/// caller releases it (observed here through the eviction loop itself).
#[test]
fn s3_referenced_handle_survives_ttl_expiry_via_deferred_cache() {
    init_logging();
    let mut config = Config::default();
    config.pattern_ttl = Duration::from_millis(1);
    config.eviction_interval = Duration::from_millis(5);
    config.eviction_auto_start = true;
    let manager = CacheManager::new(StdRegexEngine, config);

    let handle = manager.get_or_compile("a+", &Options::default()).unwrap();
    thread::sleep(Duration::from_millis(30));

    // evicted from the primary tier, but still alive and matchable because
    // this test still holds `handle`.
    assert_eq!(manager.metrics_snapshot().pattern_cache.gauges.entry_count, 0);
    assert!(handle.artifact().is_match("aaa"));
    assert_eq!(handle.refcount(), 1);

    manager.release(handle);
}

/// S4: a match outcome recorded in the result cache is served back on a
/// subsequent lookup for the same `(pattern hash, input)` pair, and a
/// different input under the same pattern is an independent entry.
#[test]
fn s4_result_cache_memoizes_by_pattern_and_input() {
    init_logging();
    let manager = manager_without_auto_start();

    let pattern_hash = retacon_cache::hash::pattern_key("^a+$", &Options::default());
    assert_eq!(manager.result_get(pattern_hash, b"aaa"), ResultLookup::Miss);

    manager.result_put(pattern_hash, b"aaa", true);
    manager.result_put(pattern_hash, b"bbb", false);

    assert_eq!(manager.result_get(pattern_hash, b"aaa"), ResultLookup::Hit(true));
    assert_eq!(manager.result_get(pattern_hash, b"bbb"), ResultLookup::Hit(false));
}

/// S5: once unreferenced entries push the pattern cache over its target
/// capacity, the background loop evicts the oldest-accessed ones until the
/// tier is back at or under capacity.
#[test]
fn s5_capacity_eviction_converges_under_background_sweep() {
    init_logging();
    let mut config = Config::default();
    config.pattern_ttl = Duration::from_secs(3600);
    config.pattern_target_capacity_bytes = 64;
    config.pattern_lru_batch_size = 4;
    config.eviction_interval = Duration::from_millis(5);
    config.eviction_auto_start = true;
    let manager = CacheManager::new(StdRegexEngine, config);

    for i in 0..20 {
        let handle = manager
            .get_or_compile(&format!("pattern-{i}"), &Options::default())
            .unwrap();
        manager.release(handle);
    }

    thread::sleep(Duration::from_millis(60));
    let snapshot = manager.metrics_snapshot();
    assert!(snapshot.pattern_cache.gauges.actual_size_bytes <= 64);
}

/// S6: concurrent first-time compiles of the same pattern collapse onto a
/// single compiled artifact instead of each caller compiling its own copy.
#[test]
fn s6_concurrent_misses_collapse_to_a_single_compile() {
    init_logging();
    let manager = Arc::new(manager_without_auto_start());

    let threads: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.get_or_compile("concurrent+pattern*", &Options::default()).unwrap())
        })
        .collect();

    let handles: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    let first = &handles[0];
    for other in &handles[1..] {
        assert!(first.is_same_as(other));
    }
    assert_eq!(first.refcount(), 16);
    assert_eq!(manager.metrics_snapshot().pattern_cache.gauges.entry_count, 1);

    for handle in handles {
        manager.release(handle);
    }
}

/// A handle that is never released is eventually forced out of the
/// deferred cache and a leak warning is logged, rather than being held
/// onto forever.
#[test]
fn leaked_handle_is_forcibly_evicted_from_the_deferred_cache() {
    init_logging();
    let mut config = Config::default();
    config.pattern_ttl = Duration::from_millis(1);
    config.deferred_ttl = Duration::from_millis(10);
    config.eviction_interval = Duration::from_millis(5);
    config.eviction_auto_start = true;
    let manager = CacheManager::new(StdRegexEngine, config);

    let handle = manager.get_or_compile("a+", &Options::default()).unwrap();
    // deliberately never released, simulating a caller that forgot to.
    std::mem::forget(handle);

    thread::sleep(Duration::from_millis(80));
    assert_eq!(manager.metrics_snapshot().deferred_cache.entry_count, 0);
    assert_eq!(manager.metrics_snapshot().deferred_cache.forced_evictions, 1);
}
