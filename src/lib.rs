//! # retacon-cache
//!
//! A three-tier, reference-counted, background-evicted cache for compiled
//! regular-expression automata.
//!
//! Compiling a pattern is the expensive part of using a regex engine;
//! matching against an already-compiled program is cheap. This crate sits
//! in front of any engine that implements [`Engine`] and makes repeated
//! calls to compile the same `(pattern text, options)` pair free after the
//! first one, without ever freeing a compiled artifact while a caller still
//! holds a reference to it.
//!
//! ## Module organization
//!
//! - [`pattern_cache`] - the primary tier: `(pattern, options)` → a
//!   reference-counted handle around the compiled artifact
//! - [`deferred`] - a holding area for handles evicted from the primary tier
//!   while still referenced
//! - [`result_cache`] - a bounded memoization layer from `(pattern hash,
//!   input hash)` to a match outcome
//! - [`eviction`] - the single background thread that sweeps all three tiers
//! - [`manager`] - [`CacheManager`], the crate's entry point
//! - [`engine`] - the [`Engine`] contract and a `regex`-backed implementation
//! - [`config`] - typed, validated configuration loaded from TOML
//! - [`metrics`] - atomic per-tier counters and a point-in-time snapshot
//!
//! ## Example
//!
//! ```
//! use retacon_cache::{CacheManager, Options, StdRegexEngine};
//! use retacon_cache::config::Config;
//!
//! let manager = CacheManager::new(StdRegexEngine, Config::default());
//! let handle = manager.get_or_compile("a+b*", &Options::default())?;
//! assert!(handle.artifact().is_match("aaab"));
//! manager.release(handle);
//! # Ok::<(), retacon_cache::CompileError>(())
//! ```

pub mod config;
pub mod deferred;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod handle;
pub mod hash;
pub mod manager;
pub mod metrics;
pub mod options;
pub mod pattern_cache;
pub mod result_cache;

pub use config::Config;
pub use deferred::DeferredCache;
pub use engine::{Engine, StdRegexEngine};
pub use error::{CompileError, CompileErrorKind, ConfigError};
pub use eviction::EvictionLoop;
pub use handle::PatternHandle;
pub use manager::CacheManager;
pub use metrics::MetricsBundle;
pub use options::{Encoding, Options};
pub use pattern_cache::PatternCache;
pub use result_cache::{ResultCache, ResultLookup};
