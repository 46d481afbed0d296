//! The main cache interface.
//!
//! [`CacheService`] owns one storage backend and one eviction policy and keeps
//! them in step. It builds full keys (`prefix + segment + ":" + key`), enforces
//! the capacity limit, aggregates metrics, and turns backend failures into
//! misses so that callers never fail because of the cache.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::{CacheConfig, CacheOptions, StorageType};
use crate::error::{CacheError, CacheResult};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::monitoring::{MonitoringSink, TracingSink};
use crate::pattern::KeyPattern;
use crate::policy::{self, EvictionPolicy};
use crate::storage::{
    CacheSource, HealthState, HybridStorage, Lookup, MemoryStorage, RedisConnector,
    RemoteConnector, RemoteStorage, StorageStrategy,
};

/// Values the cache can hold.
///
/// Anything that serde can round-trip through JSON qualifies.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct GetResult<V> {
    pub hit: bool,
    pub value: Option<V>,
    /// Time spent in the storage call.
    pub latency: Duration,
    /// Which tier served a hit.
    pub source: Option<CacheSource>,
}

impl<V> GetResult<V> {
    pub fn into_value(self) -> Option<V> {
        self.value
    }
}

/// A key/value cache over a pluggable storage backend.
///
/// # Example
/// ```
/// use tiered_cache::{CacheConfig, CacheOptions, CacheService};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> tiered_cache::CacheResult<()> {
/// let config = CacheConfig::new()
///     .max_size(1000)
///     .default_ttl(Duration::from_secs(300))
///     .build();
/// let cache: CacheService<String> = CacheService::new(config).await?;
///
/// cache.set("user:123", "Alice".to_string()).await?;
/// assert_eq!(cache.get("user:123").await.value.as_deref(), Some("Alice"));
///
/// let weather = CacheOptions::new().segment("weather").ttl(Duration::from_secs(60));
/// cache.set_with("berlin", "sunny".to_string(), &weather).await?;
///
/// println!("hit ratio: {:.2}", cache.metrics().hit_ratio);
/// cache.destroy();
/// # Ok(())
/// # }
/// ```
pub struct CacheService<V>
where
    V: Send + Sync + 'static,
{
    config: CacheConfig,
    storage: Arc<dyn StorageStrategy<V>>,
    policy: Mutex<Box<dyn EvictionPolicy>>,
    metrics: Arc<CacheMetrics>,
    sink: Arc<dyn MonitoringSink>,
    /// Segment of every key written with one, for the per-segment size column.
    key_segments: Mutex<HashMap<String, String>>,
    /// Serializes writers so the size check, eviction, storage write and
    /// policy update of one `set` cannot interleave with another.
    writes: tokio::sync::Mutex<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl<V: CacheValue> CacheService<V> {
    /// Build a cache from configuration, reporting to `tracing`.
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        Self::with_sink(config, Arc::new(TracingSink)).await
    }

    /// Build a cache from configuration with a custom monitoring sink.
    ///
    /// `Remote` and `Hybrid` storage connect to `remote_url` with Redis.
    pub async fn with_sink(config: CacheConfig, sink: Arc<dyn MonitoringSink>) -> CacheResult<Self> {
        config.validate()?;
        let connector = Arc::new(RedisConnector::new(
            config.get_remote_url().unwrap_or_default(),
        ));
        Self::with_connector(config, connector, sink).await
    }

    /// Build a cache whose remote tier is reached through `connector`.
    ///
    /// When the first connection fails, the error goes to the sink and the
    /// cache starts degraded. The health probe reconnects later.
    pub async fn with_connector(
        config: CacheConfig,
        connector: Arc<dyn RemoteConnector>,
        sink: Arc<dyn MonitoringSink>,
    ) -> CacheResult<Self> {
        config.validate()?;
        let prefix = config.get_key_prefix().to_string();
        let op_timeout = config.get_operation_timeout();

        let storage: Arc<dyn StorageStrategy<V>> = match config.get_storage_type() {
            StorageType::Memory => Arc::new(MemoryStorage::<V>::with_cleanup_interval(
                config.get_cleanup_interval(),
            )),
            StorageType::Remote => {
                let remote = Self::connect_remote(connector, prefix, op_timeout, &sink).await;
                if let Some(period) = config.get_health_check_interval() {
                    remote.start_health_probe(period);
                }
                Arc::new(remote)
            }
            StorageType::Hybrid => {
                let remote = Self::connect_remote(connector, prefix, op_timeout, &sink).await;
                let memory = MemoryStorage::with_cleanup_interval(config.get_cleanup_interval());
                let hybrid =
                    HybridStorage::new(memory, remote, config.get_default_ttl(), Arc::clone(&sink));
                if let Some(period) = config.get_health_check_interval() {
                    hybrid.start_health_probe(period);
                }
                Arc::new(hybrid)
            }
        };

        Ok(Self::from_storage(config, storage, sink))
    }

    /// Connect the remote tier, falling back to a disconnected one.
    async fn connect_remote(
        connector: Arc<dyn RemoteConnector>,
        prefix: String,
        op_timeout: Option<Duration>,
        sink: &Arc<dyn MonitoringSink>,
    ) -> RemoteStorage<V> {
        match RemoteStorage::<V>::connect(Arc::clone(&connector), prefix.clone(), op_timeout).await
        {
            Ok(remote) => remote,
            Err(err) => {
                warn!(remote = %connector.target(), error = %err, "remote store unreachable at startup");
                sink.track_error("cache.remote_connect", &err, &[("target", connector.target())]);
                RemoteStorage::disconnected(connector, prefix, op_timeout)
            }
        }
    }

    /// Wrap an already-built storage backend.
    pub fn from_storage(
        config: CacheConfig,
        storage: Arc<dyn StorageStrategy<V>>,
        sink: Arc<dyn MonitoringSink>,
    ) -> Self {
        let service = Self {
            policy: Mutex::new(policy::for_strategy(config.get_eviction_strategy())),
            config,
            storage,
            metrics: Arc::new(CacheMetrics::new()),
            sink,
            key_segments: Mutex::new(HashMap::new()),
            writes: tokio::sync::Mutex::new(()),
            flusher: Mutex::new(None),
        };
        if let Some(period) = service.config.get_metrics_flush_interval() {
            service.start_metrics_flush(period);
        }
        service
    }

    /// Push aggregate metrics to the sink every `period`.
    fn start_metrics_flush(&self, period: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime; periodic metrics flush disabled");
            return;
        };
        let metrics = Arc::downgrade(&self.metrics);
        let sink = Arc::clone(&self.sink);
        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(metrics) = metrics.upgrade() else {
                    break;
                };
                let snapshot = metrics.snapshot();
                sink.track_metrics("cache.metrics", &snapshot.as_metric_fields());
            }
        });
        *self.flusher.lock() = Some(handle);
    }

    fn active_segment<'a>(&self, segment: Option<&'a str>) -> Option<&'a str> {
        segment.filter(|_| self.config.is_segmentation_enabled())
    }

    /// `prefix + (segment + ":")? + key`.
    pub fn build_key(&self, key: &str, segment: Option<&str>) -> String {
        let prefix = self.config.get_key_prefix();
        match self.active_segment(segment) {
            Some(segment) => format!("{prefix}{segment}:{key}"),
            None => format!("{prefix}{key}"),
        }
    }

    fn segment_pattern(&self, segment: &str) -> String {
        format!("{}{}:*", self.config.get_key_prefix(), segment)
    }

    /// Log a swallowed storage failure and hand it to the sink.
    fn report(&self, op: &'static str, err: &CacheError, key: &str) {
        warn!(op, key, error = %err, "cache storage failure");
        self.sink.track_error(op, err, &[("key", key.to_string())]);
    }

    /// Drop a key from the eviction bookkeeping and its segment's size.
    fn forget(&self, full_key: &str) {
        self.policy.lock().remove_key(full_key);
        self.forget_segment(full_key);
    }

    fn forget_segment(&self, full_key: &str) {
        if let Some(segment) = self.key_segments.lock().remove(full_key) {
            self.metrics.decrement_segment_size(&segment);
        }
    }

    /// Look up a key.
    pub async fn get(&self, key: &str) -> GetResult<V> {
        self.get_with(key, &CacheOptions::default()).await
    }

    /// Look up a key. Backend failures are reported and count as misses.
    pub async fn get_with(&self, key: &str, options: &CacheOptions) -> GetResult<V> {
        let segment = self.active_segment(options.segment.as_deref());
        let full_key = self.build_key(key, segment);

        let started = Instant::now();
        let outcome = self.storage.get(&full_key).await;
        let latency = started.elapsed();
        self.metrics.record_latency(latency);

        let found = match outcome {
            Ok(found) => found,
            Err(err) => {
                self.report("cache.get", &err, &full_key);
                None
            }
        };

        match found {
            Some(Lookup { value, source }) => {
                self.policy.lock().record_access(&full_key);
                self.metrics.record_lookup(true, segment);
                debug!(key = %full_key, ?source, "cache hit");
                GetResult {
                    hit: true,
                    value: Some(value),
                    latency,
                    source: Some(source),
                }
            }
            None => {
                self.metrics.record_lookup(false, segment);
                debug!(key = %full_key, "cache miss");
                GetResult {
                    hit: false,
                    value: None,
                    latency,
                    source: None,
                }
            }
        }
    }

    /// Store a value with the default TTL. `None` is ignored.
    pub async fn set(&self, key: &str, value: impl Into<Option<V>>) -> CacheResult<()> {
        self.set_with(key, value, &CacheOptions::default()).await
    }

    /// Store a value.
    ///
    /// Passing `None` is a no-op. When the cache is full and `key` is new,
    /// one entry is evicted first. The TTL is `options.ttl`, else the
    /// configured default; a zero TTL stores without expiry.
    ///
    /// Only a value the remote store cannot serialize is returned as an
    /// error; every other backend failure is reported and swallowed.
    pub async fn set_with(
        &self,
        key: &str,
        value: impl Into<Option<V>>,
        options: &CacheOptions,
    ) -> CacheResult<()> {
        let Some(value) = value.into() else {
            debug!(key, "ignoring set without a value");
            return Ok(());
        };
        let segment = self.active_segment(options.segment.as_deref());
        let full_key = self.build_key(key, segment);

        let _gate = self.writes.lock().await;
        let is_new = !self.policy.lock().contains(&full_key);
        if is_new {
            match self.storage.size().await {
                Ok(size) if size >= self.config.get_max_size() => self.evict_entry().await,
                Ok(_) => {}
                Err(err) => self.report("cache.size", &err, &full_key),
            }
        }

        let ttl = options
            .ttl
            .or(self.config.get_default_ttl())
            .filter(|ttl| !ttl.is_zero());
        if let Err(err) = self.storage.set(&full_key, value, ttl).await {
            self.report("cache.set", &err, &full_key);
            if err.is_serialization() {
                return Err(err);
            }
            return Ok(());
        }

        self.policy.lock().record_set(&full_key);
        if is_new {
            if let Some(segment) = segment {
                self.metrics.increment_segment_size(segment);
                self.key_segments
                    .lock()
                    .insert(full_key.clone(), segment.to_string());
            }
        }
        debug!(key = %full_key, ?ttl, "cache set");
        Ok(())
    }

    /// Return the cached value, or run `fetcher` and cache what it returns.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetcher: F) -> CacheResult<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.get_or_fetch_with(key, fetcher, &CacheOptions::default())
            .await
    }

    /// Return the cached value, or run `fetcher` and cache what it returns.
    ///
    /// On a miss the fetcher runs exactly once. Its error is reported and
    /// returned as [`CacheError::Fetcher`] with the original error as source.
    /// A fetched value that cannot be cached is still returned.
    ///
    /// Concurrent misses on the same key are not coalesced: each caller runs
    /// its own fetcher.
    pub async fn get_or_fetch_with<F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: &CacheOptions,
    ) -> CacheResult<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        if let Some(value) = self.get_with(key, options).await.value {
            return Ok(Some(value));
        }

        let fetched = match fetcher().await {
            Ok(fetched) => fetched,
            Err(err) => {
                let err = CacheError::Fetcher(err.into());
                warn!(key, error = %err, "fetcher failed");
                self.sink.track_error("cache.fetch", &err, &[("key", key.to_string())]);
                return Err(err);
            }
        };

        if let Some(value) = &fetched {
            if let Err(err) = self.set_with(key, value.clone(), options).await {
                debug!(key, error = %err, "fetched value returned uncached");
            }
        }
        Ok(fetched)
    }

    /// Remove a key. Returns whether the storage held it.
    pub async fn invalidate(&self, key: &str, segment: Option<&str>) -> bool {
        let full_key = self.build_key(key, segment);
        let _gate = self.writes.lock().await;
        let removed = match self.storage.delete(&full_key).await {
            Ok(removed) => {
                self.forget(&full_key);
                removed
            }
            // the entry may still be stored, so it stays tracked
            Err(err) => {
                self.report("cache.invalidate", &err, &full_key);
                false
            }
        };
        debug!(key = %full_key, removed, "cache invalidate");
        removed
    }

    /// Remove everything, or only the keys of one segment.
    ///
    /// Clearing a segment also zeroes that segment's counters.
    pub async fn clear(&self, segment: Option<&str>) {
        let _gate = self.writes.lock().await;
        match segment {
            None => {
                if let Err(err) = self.storage.clear(None).await {
                    self.report("cache.clear", &err, "*");
                }
                self.policy.lock().clear();
                self.key_segments.lock().clear();
                self.metrics.reset_segment_sizes();
            }
            Some(segment) => {
                let pattern = self.segment_pattern(segment);
                if let Err(err) = self.storage.clear(Some(&pattern)).await {
                    self.report("cache.clear", &err, &pattern);
                }
                let matcher = KeyPattern::new(pattern.as_str());
                {
                    let mut policy = self.policy.lock();
                    for key in policy.keys() {
                        if matcher.matches(&key) {
                            policy.remove_key(&key);
                        }
                    }
                }
                self.key_segments.lock().retain(|_, s| s != segment);
                self.metrics.reset_segment(segment);
            }
        }
        debug!(?segment, "cache clear");
    }

    /// Whether a live entry exists. Does not count as an access.
    pub async fn has(&self, key: &str, segment: Option<&str>) -> bool {
        let full_key = self.build_key(key, segment);
        match self.storage.has(&full_key).await {
            Ok(found) => found,
            Err(err) => {
                self.report("cache.has", &err, &full_key);
                false
            }
        }
    }

    /// Full keys currently stored, optionally limited to one segment.
    pub async fn keys(&self, segment: Option<&str>) -> Vec<String> {
        let pattern = segment.map(|segment| self.segment_pattern(segment));
        match self.storage.keys(pattern.as_deref()).await {
            Ok(keys) => keys,
            Err(err) => {
                self.report("cache.keys", &err, pattern.as_deref().unwrap_or("*"));
                Vec::new()
            }
        }
    }

    pub async fn size(&self) -> usize {
        match self.storage.size().await {
            Ok(size) => size,
            Err(err) => {
                self.report("cache.size", &err, "*");
                0
            }
        }
    }

    /// Evict the policy's candidate.
    ///
    /// The candidate leaves the policy before the delete, so two evictions
    /// never pick the same key. Candidates the storage no longer holds (for
    /// example swept after expiry) are reported and the next one is tried.
    /// Callers hold the write gate.
    async fn evict_entry(&self) {
        loop {
            let Some(candidate) = self.policy.lock().pop_candidate() else {
                return;
            };
            match self.storage.delete(&candidate).await {
                Ok(true) => {
                    self.forget_segment(&candidate);
                    self.metrics.record_eviction();
                    debug!(key = %candidate, "evicted");
                    return;
                }
                Ok(false) => {
                    let err = CacheError::PolicyInvariant(candidate.clone());
                    self.report("cache.evict", &err, &candidate);
                    self.forget_segment(&candidate);
                }
                Err(err) => {
                    self.report("cache.evict", &err, &candidate);
                    // still stored as far as we know
                    self.policy.lock().record_set(&candidate);
                    return;
                }
            }
        }
    }

    /// A snapshot of hit ratio, latency, evictions and per-segment counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The live counters, for integrating with external metrics systems.
    pub fn metrics_ref(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn health(&self) -> HealthState {
        self.storage.health()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of keys tracked by the eviction policy.
    pub fn tracked_keys(&self) -> usize {
        self.policy.lock().len()
    }

    /// Stop every background task and close the remote connection.
    ///
    /// The instance stays usable afterwards but no longer sweeps, probes or
    /// flushes; remote-backed storage reports not-connected.
    pub fn destroy(&self) {
        if let Some(handle) = self.flusher.lock().take() {
            handle.abort();
        }
        self.storage.destroy();
    }
}

impl<V> Drop for CacheService<V>
where
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(handle) = self.flusher.get_mut().take() {
            handle.abort();
        }
    }
}
