//! Typed, validated configuration, loaded from a textual (TOML) source.
//!
//! Following the same two-step shape as `d-oit-do-codeguardian`'s
//! configuration loading: a `serde`-deserializable raw form is parsed first,
//! then converted through `TryFrom` into a validated [`Config`] that every
//! other component in the crate can trust without re-checking invariants.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Which concurrent-map implementation a tier's storage should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapFlavor {
    /// A single `parking_lot::RwLock<HashMap<..>>`. Simple, and fast under
    /// read-heavy, low-contention workloads.
    RwLock,
    /// A sharded `dashmap::DashMap<..>`. Scales better under high
    /// concurrent fan-in at the cost of per-shard bookkeeping.
    DashMap,
}

impl Default for MapFlavor {
    fn default() -> Self {
        MapFlavor::RwLock
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawPatternCacheConfig {
    pub target_capacity_bytes: u64,
    pub ttl_secs: u64,
    pub lru_batch_size: u64,
    pub map_flavor: MapFlavor,
}

impl Default for RawPatternCacheConfig {
    fn default() -> Self {
        Self {
            target_capacity_bytes: 64 << 20,
            ttl_secs: 300,
            lru_batch_size: 100,
            map_flavor: MapFlavor::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawResultCacheConfig {
    pub enabled: bool,
    pub target_capacity_bytes: u64,
    pub input_threshold_bytes: u64,
    pub ttl_secs: u64,
    pub lru_batch_size: u64,
    pub map_flavor: MapFlavor,
}

impl Default for RawResultCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_capacity_bytes: 16 << 20,
            input_threshold_bytes: 4096,
            ttl_secs: 60,
            lru_batch_size: 100,
            map_flavor: MapFlavor::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawDeferredCacheConfig {
    pub ttl_secs: u64,
}

impl Default for RawDeferredCacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 900 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawEvictionLoopConfig {
    pub interval_ms: u64,
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl Default for RawEvictionLoopConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            auto_start: true,
        }
    }
}

/// The `serde`-deserializable form of the configuration, before validation.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawConfig {
    pub pattern_cache: RawPatternCacheConfig,
    pub result_cache: RawResultCacheConfig,
    pub deferred_cache: RawDeferredCacheConfig,
    pub eviction_loop: RawEvictionLoopConfig,
}

/// Validated configuration. Every numeric field here has already been
/// checked to be nonzero where zero would be meaningless, and durations have
/// already been checked against each other where the spec requires an
/// ordering (the deferred cache's TTL must exceed the pattern cache's, so a
/// handle is never forced out of the deferred tier before it would even
/// have expired from the primary one).
#[derive(Debug, Clone)]
pub struct Config {
    pub pattern_target_capacity_bytes: u64,
    pub pattern_ttl: Duration,
    pub pattern_lru_batch_size: usize,
    pub pattern_map_flavor: MapFlavor,

    pub result_enabled: bool,
    pub result_target_capacity_bytes: u64,
    pub result_input_threshold_bytes: u64,
    pub result_ttl: Duration,
    pub result_lru_batch_size: usize,
    pub result_map_flavor: MapFlavor,

    pub deferred_ttl: Duration,

    pub eviction_interval: Duration,
    pub eviction_auto_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config::try_from(RawConfig::default()).expect("built-in defaults are always valid")
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        if raw.pattern_cache.target_capacity_bytes == 0 {
            return Err(ConfigError::new(
                "pattern_cache.target_capacity_bytes",
                "must be greater than zero",
            ));
        }
        if raw.pattern_cache.lru_batch_size == 0 {
            return Err(ConfigError::new(
                "pattern_cache.lru_batch_size",
                "must be greater than zero",
            ));
        }
        if raw.pattern_cache.ttl_secs == 0 {
            return Err(ConfigError::new(
                "pattern_cache.ttl_secs",
                "must be greater than zero",
            ));
        }
        if raw.result_cache.enabled && raw.result_cache.target_capacity_bytes == 0 {
            return Err(ConfigError::new(
                "result_cache.target_capacity_bytes",
                "must be greater than zero when result_cache.enabled is true",
            ));
        }
        if raw.result_cache.lru_batch_size == 0 {
            return Err(ConfigError::new(
                "result_cache.lru_batch_size",
                "must be greater than zero",
            ));
        }
        if raw.result_cache.ttl_secs == 0 {
            return Err(ConfigError::new(
                "result_cache.ttl_secs",
                "must be greater than zero",
            ));
        }
        if raw.result_cache.input_threshold_bytes == 0 {
            return Err(ConfigError::new(
                "result_cache.input_threshold_bytes",
                "must be greater than zero",
            ));
        }
        if raw.eviction_loop.interval_ms == 0 {
            return Err(ConfigError::new(
                "eviction_loop.interval_ms",
                "must be greater than zero",
            ));
        }
        if raw.deferred_cache.ttl_secs <= raw.pattern_cache.ttl_secs {
            return Err(ConfigError::new(
                "deferred_cache.ttl_secs",
                "must be greater than pattern_cache.ttl_secs, so a handle cannot be forced out of \
                 the deferred tier before it would have expired from the primary one",
            ));
        }

        Ok(Config {
            pattern_target_capacity_bytes: raw.pattern_cache.target_capacity_bytes,
            pattern_ttl: Duration::from_secs(raw.pattern_cache.ttl_secs),
            pattern_lru_batch_size: raw.pattern_cache.lru_batch_size as usize,
            pattern_map_flavor: raw.pattern_cache.map_flavor,

            result_enabled: raw.result_cache.enabled,
            result_target_capacity_bytes: raw.result_cache.target_capacity_bytes,
            result_input_threshold_bytes: raw.result_cache.input_threshold_bytes,
            result_ttl: Duration::from_secs(raw.result_cache.ttl_secs),
            result_lru_batch_size: raw.result_cache.lru_batch_size as usize,
            result_map_flavor: raw.result_cache.map_flavor,

            deferred_ttl: Duration::from_secs(raw.deferred_cache.ttl_secs),

            eviction_interval: Duration::from_millis(raw.eviction_loop.interval_ms),
            eviction_auto_start: raw.eviction_loop.auto_start,
        })
    }
}

impl Config {
    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| ConfigError::new("<toml>", e.to_string()))?;
        Config::try_from(raw)
    }
}
