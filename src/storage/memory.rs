//! In-process storage backed by an `IndexMap`.
//!
//! Expired entries are removed lazily on access and by a periodic sweep, so
//! entries that are written once and never read again do not pile up.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::{Lookup, StorageStrategy};
use crate::entry::Entry;
use crate::error::CacheResult;
use crate::pattern::KeyPattern;

type Entries<V> = RwLock<IndexMap<String, Entry<V>>>;

/// Thread-safe in-process map of entries.
#[derive(Debug)]
pub struct MemoryStorage<V> {
    /// Insertion-ordered so `keys()` is stable.
    entries: Arc<Entries<V>>,

    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> MemoryStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a store without a background sweep.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(IndexMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    /// Create a store that sweeps expired entries every `cleanup_interval`.
    ///
    /// The sweep needs a tokio runtime; outside of one only lazy expiration
    /// is active.
    pub fn with_cleanup_interval(cleanup_interval: Option<Duration>) -> Self {
        let storage = Self::new();
        if let Some(period) = cleanup_interval {
            storage.start_cleanup(period);
        }
        storage
    }

    /// Start a background task to remove expired entries.
    fn start_cleanup(&self, period: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("no tokio runtime; expiry sweep disabled, relying on lazy expiration");
                return;
            }
        };

        let entries = Arc::downgrade(&self.entries);
        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let removed = purge_expired(&entries);
                if removed > 0 {
                    debug!(removed, "swept expired entries");
                }
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    /// Remove all expired entries now. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        purge_expired(&self.entries)
    }

    /// Live value for `key`, recording the access.
    pub fn lookup(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key)?;
        if entry.is_expired() {
            entries.shift_remove(key);
            debug!(key, "memory entry expired on access");
            return None;
        }
        entry.touch();
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.entries
            .write()
            .insert(key.to_string(), Entry::new(value, ttl));
    }

    /// Remove `key`, returning whether a live entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .shift_remove(key)
            .map_or(false, |entry| !entry.is_expired())
    }

    pub fn clear_matching(&self, pattern: Option<&str>) {
        let mut entries = self.entries.write();
        match pattern {
            None => entries.clear(),
            Some(pattern) => {
                let pattern = KeyPattern::new(pattern);
                entries.retain(|key, _| !pattern.matches(key));
            }
        }
    }

    /// Whether a live entry exists. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .map_or(false, |entry| !entry.is_expired())
    }

    pub fn key_list(&self, pattern: Option<&str>) -> Vec<String> {
        let pattern = pattern.map(KeyPattern::new);
        let now = Instant::now();
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .filter(|(key, _)| pattern.as_ref().map_or(true, |p| p.matches(key)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of stored entries.
    ///
    /// This may include expired entries the sweep has not reached yet.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a live entry; `Some(None)` means it never expires.
    pub fn remaining_ttl(&self, key: &str) -> Option<Option<Duration>> {
        self.entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(Entry::remaining_ttl)
    }

    /// Read-access metadata `(access_count, created_at, last_accessed)`.
    pub fn access_stats(&self, key: &str) -> Option<(u64, Instant, Instant)> {
        self.entries
            .read()
            .get(key)
            .map(|entry| (entry.access_count(), entry.created_at(), entry.last_accessed()))
    }

    /// Stop the sweep task. Entries stay readable.
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl<V> Default for MemoryStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for MemoryStorage<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

fn purge_expired<V>(entries: &Entries<V>) -> usize {
    let mut entries = entries.write();
    let initial_len = entries.len();
    let now = Instant::now();
    entries.retain(|_, entry| !entry.is_expired_at(now));
    initial_len - entries.len()
}

#[async_trait]
impl<V> StorageStrategy<V> for MemoryStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<Lookup<V>>> {
        Ok(self.lookup(key).map(Lookup::memory))
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> CacheResult<()> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.remove(key))
    }

    async fn clear(&self, pattern: Option<&str>) -> CacheResult<()> {
        self.clear_matching(pattern);
        Ok(())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.contains(key))
    }

    async fn keys(&self, pattern: Option<&str>) -> CacheResult<Vec<String>> {
        Ok(self.key_list(pattern))
    }

    async fn size(&self) -> CacheResult<usize> {
        Ok(self.len())
    }

    fn destroy(&self) {
        self.stop();
    }
}
