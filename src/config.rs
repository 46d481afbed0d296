//! Configuration for the cache service.
//!
//! This module provides a builder pattern for configuring cache behavior
//! including capacity limits, TTL defaults, backend selection and the
//! intervals of the background tasks. It also holds [`CacheOptions`], the
//! per-call knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Which eviction policy decides what to drop under capacity pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvictionStrategy {
    /// Least recently used.
    #[default]
    Lru,
    /// Least frequently used, oldest first on ties.
    Lfu,
}

/// Which storage backend holds the entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageType {
    /// In-process map only.
    #[default]
    Memory,
    /// Shared remote store only.
    Remote,
    /// In-process map in front of the shared remote store.
    Hybrid,
}

/// Configuration for creating a new cache instance.
///
/// Use the builder pattern to construct configuration:
///
/// ```
/// use tiered_cache::{CacheConfig, EvictionStrategy};
/// use std::time::Duration;
///
/// let config = CacheConfig::new()
///     .max_size(10_000)
///     .default_ttl(Duration::from_secs(300))
///     .eviction_strategy(EvictionStrategy::Lfu)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a call does not pass one. `None` means no expiry.
    #[serde(with = "duration_secs")]
    pub(crate) default_ttl: Option<Duration>,

    /// Maximum number of distinct entries before eviction kicks in.
    pub(crate) max_size: usize,

    pub(crate) eviction_strategy: EvictionStrategy,

    pub(crate) storage_type: StorageType,

    /// Whether `CacheOptions::segment` is folded into the key.
    pub(crate) segmentation_enabled: bool,

    pub(crate) key_prefix: String,

    /// Connection URL for the remote store, e.g. `redis://127.0.0.1:6379`.
    pub(crate) remote_url: Option<String>,

    /// Interval of the in-memory expiry sweep. `None` disables it.
    #[serde(with = "duration_secs")]
    pub(crate) cleanup_interval: Option<Duration>,

    /// Interval of the remote reconnection probe.
    #[serde(with = "duration_secs")]
    pub(crate) health_check_interval: Option<Duration>,

    /// Interval at which aggregate metrics are pushed to the monitoring sink.
    #[serde(with = "duration_secs")]
    pub(crate) metrics_flush_interval: Option<Duration>,

    /// Upper bound for a single remote connect or command.
    #[serde(with = "duration_secs")]
    pub(crate) operation_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(3600)),
            max_size: 10_000,
            eviction_strategy: EvictionStrategy::Lru,
            storage_type: StorageType::Memory,
            segmentation_enabled: true,
            key_prefix: "app:".to_string(),
            remote_url: None,
            cleanup_interval: Some(Duration::from_secs(60)),
            health_check_interval: Some(Duration::from_secs(30)),
            metrics_flush_interval: Some(Duration::from_secs(300)),
            operation_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Zero durations switch the corresponding feature off.
fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}

impl CacheConfig {
    /// Create a new configuration builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL for entries.
    ///
    /// Set to `Duration::ZERO` to store entries without expiry by default.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = non_zero(ttl);
        self
    }

    /// Set the maximum number of entries.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn eviction_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.eviction_strategy = strategy;
        self
    }

    pub fn storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    /// Enable or disable segment namespacing of keys.
    pub fn segmentation(mut self, enabled: bool) -> Self {
        self.segmentation_enabled = enabled;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the remote store URL. Required for `Remote` and `Hybrid`.
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    /// Set the interval for the background sweep of expired entries.
    ///
    /// Expired entries are still removed lazily on access when the sweep
    /// is disabled with `Duration::ZERO`.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = non_zero(interval);
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = non_zero(interval);
        self
    }

    pub fn metrics_flush_interval(mut self, interval: Duration) -> Self {
        self.metrics_flush_interval = non_zero(interval);
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = non_zero(timeout);
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> Self {
        self
    }

    /// Check that the configuration can back a cache instance.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_size == 0 {
            return Err(CacheError::Config("max_size must be at least 1".to_string()));
        }
        let needs_remote = matches!(self.storage_type, StorageType::Remote | StorageType::Hybrid);
        if needs_remote && self.remote_url.as_deref().map_or(true, str::is_empty) {
            return Err(CacheError::Config(format!(
                "remote_url is required for {:?} storage",
                self.storage_type
            )));
        }
        Ok(())
    }

    pub fn get_default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn get_max_size(&self) -> usize {
        self.max_size
    }

    pub fn get_eviction_strategy(&self) -> EvictionStrategy {
        self.eviction_strategy
    }

    pub fn get_storage_type(&self) -> StorageType {
        self.storage_type
    }

    pub fn is_segmentation_enabled(&self) -> bool {
        self.segmentation_enabled
    }

    pub fn get_key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn get_remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn get_cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval
    }

    pub fn get_health_check_interval(&self) -> Option<Duration> {
        self.health_check_interval
    }

    pub fn get_metrics_flush_interval(&self) -> Option<Duration> {
        self.metrics_flush_interval
    }

    pub fn get_operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }
}

/// Per-call options.
///
/// ```
/// use tiered_cache::CacheOptions;
/// use std::time::Duration;
///
/// let options = CacheOptions::new()
///     .ttl(Duration::from_secs(60))
///     .segment("weather");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub segment: Option<String>,
    /// Reserved; currently ignored.
    pub priority: Option<i32>,
    /// Reserved; currently ignored.
    pub skip_compression: bool,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn skip_compression(mut self, skip: bool) -> Self {
        self.skip_compression = skip;
        self
    }
}

/// Serde adapter: `Option<Duration>` as whole seconds, `0`/absent meaning off.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.map_or(0, |d| d.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(d)?.unwrap_or(0);
        Ok(super::non_zero(Duration::from_secs(secs)))
    }
}
