//! Memory in front of a shared remote store.
//!
//! The memory tier is authoritative for every operation; the remote tier is
//! best effort. Remote failures are reported to the monitoring sink and never
//! reach the caller. Transient failures also switch the storage to
//! [`HealthState::Degraded`], in which the remote tier is skipped entirely
//! until a health probe reconnects it.

use async_trait::async_trait;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::memory::MemoryStorage;
use super::remote::{RemoteLink, RemoteStorage};
use super::{Lookup, StorageStrategy};
use crate::error::{CacheError, CacheResult};
use crate::monitoring::MonitoringSink;

/// Whether the remote tier is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health state plus the sink that hears about transitions.
struct HealthTracker {
    state: watch::Sender<HealthState>,
    sink: Arc<dyn MonitoringSink>,
}

impl HealthTracker {
    fn current(&self) -> HealthState {
        *self.state.borrow()
    }

    fn transition(&self, next: HealthState, reason: &str) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if !changed {
            return;
        }
        match next {
            HealthState::Healthy => info!(reason, "hybrid cache healthy, remote tier restored"),
            HealthState::Degraded => warn!(reason, "hybrid cache degraded, serving from memory only"),
        }
        self.sink.track_event(
            "cache.health_changed",
            &[("state", next.to_string()), ("reason", reason.to_string())],
        );
    }
}

/// One probe round shared by the periodic task and [`HybridStorage::check_health`].
async fn probe_once(link: &RemoteLink, health: &HealthTracker) -> HealthState {
    if health.current() == HealthState::Degraded && link.is_connected() {
        // rebuild the client rather than trust a connection we gave up on
        link.mark_disconnected();
    }
    let next = if link.probe().await {
        HealthState::Healthy
    } else {
        HealthState::Degraded
    };
    health.transition(next, "probe");
    next
}

pub struct HybridStorage<V> {
    memory: MemoryStorage<V>,
    remote: RemoteStorage<V>,
    health: Arc<HealthTracker>,
    /// TTL for backfilled entries when the remote store reports none.
    default_ttl: Option<Duration>,
    prober: Mutex<Option<JoinHandle<()>>>,
}

impl<V> HybridStorage<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Combine the two tiers. Starts degraded if the remote is not connected.
    pub fn new(
        memory: MemoryStorage<V>,
        remote: RemoteStorage<V>,
        default_ttl: Option<Duration>,
        sink: Arc<dyn MonitoringSink>,
    ) -> Self {
        let initial = if remote.is_connected() {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        };
        if initial == HealthState::Degraded {
            warn!("remote store unavailable at startup, hybrid cache starts degraded");
        }
        let (state, _) = watch::channel(initial);
        Self {
            memory,
            remote,
            health: Arc::new(HealthTracker { state, sink }),
            default_ttl,
            prober: Mutex::new(None),
        }
    }

    pub fn health_state(&self) -> HealthState {
        self.health.current()
    }

    pub fn is_degraded(&self) -> bool {
        self.health_state() == HealthState::Degraded
    }

    /// Observe health transitions.
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.health.state.subscribe()
    }

    pub fn memory(&self) -> &MemoryStorage<V> {
        &self.memory
    }

    pub fn remote(&self) -> &RemoteStorage<V> {
        &self.remote
    }

    /// Run one health probe now and return the resulting state.
    pub async fn check_health(&self) -> HealthState {
        probe_once(self.remote.link(), &self.health).await
    }

    /// Probe the remote tier every `period`.
    pub fn start_health_probe(&self, period: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime; hybrid health probe disabled");
            return;
        };
        let link = Arc::downgrade(self.remote.link());
        let health = Arc::downgrade(&self.health);
        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (Some(link), Some(health)) = (link.upgrade(), health.upgrade()) else {
                    break;
                };
                probe_once(&link, &health).await;
            }
        });
        if let Some(previous) = self.prober.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Report a swallowed remote failure; transient ones degrade immediately.
    fn on_remote_error(&self, op: &'static str, key: &str, err: &CacheError) {
        self.health
            .sink
            .track_error("cache.remote_error", err, &[("op", op.to_string()), ("key", key.to_string())]);
        if err.is_transient() {
            self.remote.mark_disconnected();
            self.health.transition(HealthState::Degraded, err.kind());
        }
    }

    async fn backfill(&self, key: &str, value: &V) {
        let ttl = match self.remote.remaining_ttl(key).await {
            Ok(Some(remaining)) => Some(remaining),
            Ok(None) => self.default_ttl,
            Err(err) => {
                self.on_remote_error("ttl", key, &err);
                self.default_ttl
            }
        };
        self.memory.insert(key, value.clone(), ttl);
        debug!(key, ?ttl, "backfilled memory from remote");
    }
}

impl<V> Drop for HybridStorage<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.prober.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<V> StorageStrategy<V> for HybridStorage<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<Lookup<V>>> {
        if let Some(value) = self.memory.lookup(key) {
            return Ok(Some(Lookup::memory(value)));
        }
        if self.is_degraded() {
            return Ok(None);
        }
        match self.remote.get(key).await {
            Ok(Some(hit)) => {
                self.backfill(key, &hit.value).await;
                Ok(Some(hit))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.on_remote_error("get", key, &err);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> CacheResult<()> {
        // an unserializable value is rejected before either tier is written
        let payload = if self.is_degraded() {
            None
        } else {
            Some(RemoteStorage::<V>::encode(&value)?)
        };
        self.memory.insert(key, value, ttl);
        if let Some(payload) = payload {
            if let Err(err) = self.remote.set_encoded(key, payload, ttl).await {
                self.on_remote_error("set", key, &err);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed = self.memory.remove(key);
        if !self.is_degraded() {
            if let Err(err) = self.remote.delete(key).await {
                self.on_remote_error("delete", key, &err);
            }
        }
        Ok(removed)
    }

    async fn clear(&self, pattern: Option<&str>) -> CacheResult<()> {
        self.memory.clear_matching(pattern);
        if !self.is_degraded() {
            if let Err(err) = self.remote.clear(pattern).await {
                self.on_remote_error("clear", pattern.unwrap_or("*"), &err);
            }
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        if self.memory.contains(key) {
            return Ok(true);
        }
        if self.is_degraded() {
            return Ok(false);
        }
        match self.remote.has(key).await {
            Ok(found) => Ok(found),
            Err(err) => {
                self.on_remote_error("has", key, &err);
                Ok(false)
            }
        }
    }

    async fn keys(&self, pattern: Option<&str>) -> CacheResult<Vec<String>> {
        let mut keys: IndexSet<String> = self.memory.key_list(pattern).into_iter().collect();
        if !self.is_degraded() {
            match self.remote.keys(pattern).await {
                Ok(remote_keys) => keys.extend(remote_keys),
                Err(err) => self.on_remote_error("keys", pattern.unwrap_or("*"), &err),
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// The larger of the two tier sizes; the tiers may diverge.
    async fn size(&self) -> CacheResult<usize> {
        let local = self.memory.len();
        if self.is_degraded() {
            return Ok(local);
        }
        match self.remote.size().await {
            Ok(remote) => Ok(local.max(remote)),
            Err(err) => {
                self.on_remote_error("size", "*", &err);
                Ok(local)
            }
        }
    }

    fn health(&self) -> HealthState {
        self.health_state()
    }

    fn destroy(&self) {
        if let Some(handle) = self.prober.lock().take() {
            handle.abort();
        }
        self.memory.stop();
        self.remote.destroy();
    }
}
