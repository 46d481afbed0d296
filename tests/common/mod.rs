//! An in-process stand-in for the remote store, with switches for outages.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tiered_cache::{
    CacheConfig, CacheError, CacheResult, KeyPattern, RemoteBackend, RemoteConnector, StorageType,
};

/// Shared fake store. Clones of the `Arc` see the same data.
#[derive(Default)]
pub struct FakeStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    down: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    connects: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse every connection and command.
    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn come_up(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    /// Answer every command after `delay`.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Commands received so far (excluding connects).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Write a raw payload, as another service instance would.
    pub fn seed(&self, key: &str, payload: &str, ttl: Option<Duration>) {
        self.entries.lock().insert(
            key.to_string(),
            (payload.to_string(), ttl.map(|ttl| Instant::now() + ttl)),
        );
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.live(key)
    }

    pub fn len(&self) -> usize {
        self.purge();
        self.entries.lock().len()
    }

    fn live(&self, key: &str) -> Option<String> {
        self.purge();
        self.entries.lock().get(key).map(|(payload, _)| payload.clone())
    }

    fn purge(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .retain(|_, (_, expires)| expires.map_or(true, |at| at > now));
    }

    async fn enter(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for FakeStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.enter().await?;
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, payload: String, ttl: Option<Duration>) -> CacheResult<()> {
        self.enter().await?;
        self.seed(key, &payload, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        self.enter().await?;
        self.purge();
        let mut entries = self.entries.lock();
        Ok(keys.iter().filter(|key| entries.remove(*key).is_some()).count() as u64)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.enter().await?;
        Ok(self.live(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.enter().await?;
        self.purge();
        let pattern = KeyPattern::new(pattern);
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.enter().await?;
        self.purge();
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .and_then(|(_, expires)| *expires)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn ping(&self) -> CacheResult<()> {
        self.enter().await
    }
}

/// Hands out the shared [`FakeStore`] unless it is down.
pub struct FakeConnector {
    pub store: Arc<FakeStore>,
}

impl FakeConnector {
    pub fn new(store: &Arc<FakeStore>) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::clone(store),
        })
    }
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    async fn connect(&self) -> CacheResult<Arc<dyn RemoteBackend>> {
        self.store.connects.fetch_add(1, Ordering::SeqCst);
        if self.store.down.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        Ok(Arc::clone(&self.store) as Arc<dyn RemoteBackend>)
    }

    fn target(&self) -> String {
        "fake://store".to_string()
    }
}

/// Config with every background task off, so tests drive timing themselves.
pub fn quiet_config(storage_type: StorageType) -> CacheConfig {
    CacheConfig::new()
        .storage_type(storage_type)
        .remote_url("fake://store")
        .cleanup_interval(Duration::ZERO)
        .health_check_interval(Duration::ZERO)
        .metrics_flush_interval(Duration::ZERO)
        .operation_timeout(Duration::from_secs(2))
        .build()
}
