//! The crate's entry point: owns the three tiers and the eviction loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::Config;
use crate::deferred::DeferredCache;
use crate::engine::Engine;
use crate::error::{CompileError, ConfigError};
use crate::eviction::EvictionLoop;
use crate::handle::PatternHandle;
use crate::metrics::MetricsBundle;
use crate::options::Options;
use crate::pattern_cache::PatternCache;
use crate::result_cache::{ResultCache, ResultLookup};

/// Owns the pattern cache, the deferred cache, the result cache, and the
/// background eviction loop sweeping all three. This is the crate's
/// intended entry point; the individual tiers are public mainly so they can
/// be embedded directly by callers who want to drive eviction themselves.
pub struct CacheManager<E: Engine> {
    pattern: Arc<PatternCache<E>>,
    deferred: Arc<DeferredCache<E::Artifact>>,
    result: Arc<ResultCache>,
    eviction_loop: EvictionLoop,
}

impl<E: Engine + 'static> CacheManager<E> {
    /// Builds the tiers from an already-validated [`Config`] and, unless
    /// `config.eviction_auto_start` is false, starts the background sweep.
    pub fn new(engine: E, config: Config) -> Self {
        let pattern = Arc::new(PatternCache::new(engine, &config));
        let deferred = Arc::new(DeferredCache::new(config.deferred_ttl));
        let result = Arc::new(ResultCache::new(&config));
        let eviction_loop = EvictionLoop::new(config.eviction_interval);

        let manager = Self {
            pattern,
            deferred,
            result,
            eviction_loop,
        };
        if config.eviction_auto_start {
            manager.start();
        }
        manager
    }

    /// Parses and validates configuration from TOML text, then builds the
    /// manager. The configuration error case is fatal to construction; any
    /// other failure surfaces later, per operation, as a [`CompileError`].
    pub fn from_toml(engine: E, toml_text: &str) -> Result<Self, ConfigError> {
        let config = Config::from_toml_str(toml_text)?;
        Ok(Self::new(engine, config))
    }

    /// Starts the background eviction loop if it isn't already running.
    pub fn start(&self) {
        let pattern = Arc::clone(&self.pattern);
        let deferred = Arc::clone(&self.deferred);
        let result = Arc::clone(&self.result);
        self.eviction_loop.start(move |now| {
            sweep_once(&pattern, &deferred, &result, now);
        });
    }

    pub fn stop(&self) {
        self.eviction_loop.stop();
    }

    pub fn running(&self) -> bool {
        self.eviction_loop.running()
    }

    /// Compiles (or reuses a cached compilation of) `text` under `options`.
    /// The returned handle's refcount has already been incremented; pass it
    /// to [`release`](Self::release) once done with it.
    pub fn get_or_compile(
        &self,
        text: &str,
        options: &Options,
    ) -> Result<PatternHandle<E::Artifact>, CompileError> {
        self.pattern.get_or_compile(text, options)
    }

    pub fn release(&self, handle: PatternHandle<E::Artifact>) {
        self.pattern.release(handle)
    }

    /// Looks up a memoized match result for `(pattern_hash, input)`. Callers
    /// obtain `pattern_hash` from their own hashing of the pattern's key
    /// material, or by hashing the pattern text/options themselves with
    /// [`crate::hash`].
    pub fn result_get(&self, pattern_hash: u64, input: &[u8]) -> ResultLookup {
        self.result.get(pattern_hash, input)
    }

    pub fn result_put(&self, pattern_hash: u64, input: &[u8], result: bool) {
        self.result.put(pattern_hash, input, result)
    }

    pub fn metrics_snapshot(&self) -> MetricsBundle {
        MetricsBundle {
            pattern_cache: self.pattern.snapshot(),
            result_cache: self.result.snapshot(),
            deferred_cache: self.deferred.snapshot(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Empties every tier. Restarts the eviction loop afterward if it was
    /// running beforehand.
    pub fn clear_all(&self) {
        let was_running = self.running();
        if was_running {
            self.stop();
        }
        self.pattern.clear(&self.deferred);
        self.result.clear();
        self.deferred.clear();
        if was_running {
            self.start();
        }
    }
}

/// Runs one sweep across all three tiers in Result → Pattern → Deferred
/// order, isolating a panic in any one tier so it cannot take down the
/// background thread or prevent the others from running.
fn sweep_once<E: Engine>(
    pattern: &PatternCache<E>,
    deferred: &DeferredCache<E::Artifact>,
    result: &ResultCache,
    now: u64,
) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| result.evict(now))) {
        tracing::error!(tier = "result_cache", ?panic, "eviction sweep panicked");
    }
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| pattern.evict(now, deferred))) {
        tracing::error!(tier = "pattern_cache", ?panic, "eviction sweep panicked");
    }
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| deferred.evict(now))) {
        tracing::error!(tier = "deferred_cache", ?panic, "eviction sweep panicked");
    }
}

impl<E: Engine> Drop for CacheManager<E> {
    fn drop(&mut self) {
        self.eviction_loop.stop();
        self.pattern.clear(&self.deferred);
        self.result.clear();
        self.deferred.clear();
    }
}
