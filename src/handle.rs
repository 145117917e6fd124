//! The reference-counted handle around a compiled artifact.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::options::Options;

/// A process-wide monotonic anchor. Handle timestamps are stored as
/// nanoseconds elapsed since this instant, which fits in an `AtomicU64` and
/// is cheap to compare, unlike `Instant` itself.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// The current tick (nanoseconds since [`EPOCH`]).
pub fn now_ticks() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Converts a [`Duration`] into the tick unit used by [`now_ticks`].
pub fn duration_to_ticks(d: Duration) -> u64 {
    d.as_nanos() as u64
}

struct HandleInner<A> {
    artifact: A,
    pattern_text: String,
    options: Options,
    /// The logical reference count the cache's contract is defined in terms
    /// of. Distinct from `Arc`'s own strong count: dropping the last
    /// `PatternHandle` clone always frees `artifact` safely regardless of
    /// this value, but eviction policy is driven by this counter, not by
    /// `Arc::strong_count`.
    refcount: AtomicI64,
    last_access: AtomicU64,
    approx_size_bytes: usize,
}

/// A shared, reference-counted handle to a compiled pattern artifact.
///
/// Cloning a `PatternHandle` clones the underlying `Arc` (cheap, and safe to
/// do freely); it does **not** by itself affect the logical refcount the
/// cache's contract is defined in terms of. That counter is only moved by
/// [`PatternCache::get_or_compile`] (increment) and [`PatternCache::release`]
/// (decrement).
///
/// [`PatternCache::get_or_compile`]: crate::pattern_cache::PatternCache::get_or_compile
/// [`PatternCache::release`]: crate::pattern_cache::PatternCache::release
pub struct PatternHandle<A> {
    inner: Arc<HandleInner<A>>,
}

impl<A> Clone for PatternHandle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> PatternHandle<A> {
    pub(crate) fn new(artifact: A, pattern_text: String, options: Options, approx_size_bytes: usize) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                artifact,
                pattern_text,
                options,
                refcount: AtomicI64::new(1),
                last_access: AtomicU64::new(now_ticks()),
                approx_size_bytes,
            }),
        }
    }

    /// Increments the logical refcount. Must be called while the caller
    /// still holds whatever lock guarantees the handle hasn't already been
    /// concurrently freed from the tier that owns it.
    pub(crate) fn incr(&self) -> i64 {
        self.inner.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the logical refcount, returning the value after the
    /// decrement.
    pub(crate) fn decr(&self) -> i64 {
        self.inner.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// The current logical refcount.
    pub fn refcount(&self) -> i64 {
        self.inner.refcount.load(Ordering::Acquire)
    }

    /// Updates the handle's last-access tick to now.
    pub(crate) fn touch(&self) {
        self.inner.last_access.store(now_ticks(), Ordering::Release);
    }

    pub fn last_access_ticks(&self) -> u64 {
        self.inner.last_access.load(Ordering::Acquire)
    }

    pub fn pattern_text(&self) -> &str {
        &self.inner.pattern_text
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub fn approx_size_bytes(&self) -> usize {
        self.inner.approx_size_bytes
    }

    /// The compiled artifact this handle refers to.
    pub fn artifact(&self) -> &A {
        &self.inner.artifact
    }

    /// Two handles are the same handle if they share the same backing
    /// allocation.
    pub fn is_same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
