//! Storage in a shared remote key/value store.
//!
//! Values travel as JSON text. The store itself sits behind two small traits:
//! [`RemoteConnector`] opens a connection and [`RemoteBackend`] runs commands
//! on it, so the storage logic (connection state, timeouts, namespacing,
//! serialization) is independent of the client library. The Redis binding
//! lives in [`super::redis`].

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{Lookup, StorageStrategy};
use crate::error::{CacheError, CacheResult};

/// Commands the cache needs from a remote store.
///
/// Keys are passed through verbatim; patterns use the `*` wildcard.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, payload: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Keys matching a [`KeyPattern`](crate::KeyPattern), where only `*` is a
    /// wildcard. Backends with a richer glob syntax escape the rest.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Remaining lifetime of a key; `None` if it has no expiry or is absent.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    async fn ping(&self) -> CacheResult<()>;
}

/// Opens connections to a remote store.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self) -> CacheResult<Arc<dyn RemoteBackend>>;

    /// Human-readable target for logs, without credentials.
    fn target(&self) -> String {
        "remote".to_string()
    }
}

/// Connection state shared between a [`RemoteStorage`] and its probe tasks.
pub(crate) struct RemoteLink {
    backend: RwLock<Option<Arc<dyn RemoteBackend>>>,
    connected: AtomicBool,
    connector: Arc<dyn RemoteConnector>,
    op_timeout: Option<Duration>,
}

impl RemoteLink {
    fn new(connector: Arc<dyn RemoteConnector>, op_timeout: Option<Duration>) -> Self {
        Self {
            backend: RwLock::new(None),
            connected: AtomicBool::new(false),
            connector,
            op_timeout,
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = CacheResult<T>>) -> CacheResult<T> {
        match self.op_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Timeout(limit)),
            },
            None => fut.await,
        }
    }

    /// Open a fresh connection and verify it answers.
    pub(crate) async fn connect(&self) -> CacheResult<()> {
        let backend = self.bounded(self.connector.connect()).await?;
        self.bounded(backend.ping()).await?;
        *self.backend.write() = Some(backend);
        self.connected.store(true, Ordering::SeqCst);
        info!(remote = %self.connector.target(), "remote store connected");
        Ok(())
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(remote = %self.connector.target(), "remote store marked disconnected");
        }
    }

    pub(crate) fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.backend.write().take();
    }

    fn backend(&self) -> CacheResult<Arc<dyn RemoteBackend>> {
        if !self.is_connected() {
            return Err(CacheError::NotConnected);
        }
        self.backend.read().clone().ok_or(CacheError::NotConnected)
    }

    /// Run one command with the timeout applied. Transient failures flip the
    /// link to disconnected.
    async fn run<T, F, Fut>(&self, op: F) -> CacheResult<T>
    where
        F: FnOnce(Arc<dyn RemoteBackend>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let backend = self.backend()?;
        let result = self.bounded(op(backend)).await;
        if let Err(err) = &result {
            if err.is_transient() {
                self.mark_disconnected();
            }
        }
        result
    }

    /// One health check: reconnect when down, ping when up.
    ///
    /// Returns whether the link is usable afterwards.
    pub(crate) async fn probe(&self) -> bool {
        if !self.is_connected() {
            return match self.connect().await {
                Ok(()) => true,
                Err(err) => {
                    debug!(error = %err, "remote reconnect attempt failed");
                    false
                }
            };
        }
        match self.run(|backend| async move { backend.ping().await }).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "remote health check failed");
                self.mark_disconnected();
                false
            }
        }
    }
}

/// Values serialized to JSON in a shared remote store.
///
/// Every operation fails with [`CacheError::NotConnected`] while the
/// connection is down, which callers can tell apart from a miss.
pub struct RemoteStorage<V> {
    link: Arc<RemoteLink>,
    /// Key prefix this storage owns; `clear(None)` and `keys(None)` stay inside it.
    namespace: String,
    prober: Mutex<Option<JoinHandle<()>>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> RemoteStorage<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a storage that is not connected yet.
    pub fn disconnected(
        connector: Arc<dyn RemoteConnector>,
        namespace: impl Into<String>,
        op_timeout: Option<Duration>,
    ) -> Self {
        Self {
            link: Arc::new(RemoteLink::new(connector, op_timeout)),
            namespace: namespace.into(),
            prober: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Create a storage and open its connection.
    pub async fn connect(
        connector: Arc<dyn RemoteConnector>,
        namespace: impl Into<String>,
        op_timeout: Option<Duration>,
    ) -> CacheResult<Self> {
        let storage = Self::disconnected(connector, namespace, op_timeout);
        storage.link.connect().await?;
        Ok(storage)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn reconnect(&self) -> CacheResult<()> {
        self.link.connect().await
    }

    /// Run one health check now. See [`RemoteStorage::start_health_probe`].
    pub async fn probe(&self) -> bool {
        self.link.probe().await
    }

    pub(crate) fn mark_disconnected(&self) {
        self.link.mark_disconnected();
    }

    pub(crate) fn link(&self) -> &Arc<RemoteLink> {
        &self.link
    }

    /// Periodically reconnect a dropped connection.
    pub fn start_health_probe(&self, period: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime; remote health probe disabled");
            return;
        };
        let link = Arc::downgrade(&self.link);
        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(link) = link.upgrade() else {
                    break;
                };
                link.probe().await;
            }
        });
        if let Some(previous) = self.prober.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Serialize a value the way it is written to the store.
    pub fn encode(value: &V) -> CacheResult<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(payload: &str) -> CacheResult<V> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Write an already-encoded payload.
    pub async fn set_encoded(
        &self,
        key: &str,
        payload: String,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.link
            .run(|backend| async move { backend.set(key, payload, ttl).await })
            .await?;
        debug!(key, ?ttl, "remote set");
        Ok(())
    }

    /// Remaining TTL of a stored key, `None` when it has none.
    pub async fn remaining_ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.link
            .run(|backend| async move { backend.ttl(key).await })
            .await
    }

    fn scope(&self, pattern: Option<&str>) -> String {
        match pattern {
            Some(pattern) => pattern.to_string(),
            None => format!("{}*", self.namespace),
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.prober.lock().take() {
            handle.abort();
        }
    }
}

impl<V> Drop for RemoteStorage<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.prober.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<V> StorageStrategy<V> for RemoteStorage<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<Lookup<V>>> {
        let payload = self
            .link
            .run(|backend| async move { backend.get(key).await })
            .await?;
        match payload {
            Some(payload) => Ok(Some(Lookup::remote(Self::decode(&payload)?))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> CacheResult<()> {
        let payload = Self::encode(&value)?;
        self.set_encoded(key, payload, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let keys = [key.to_string()];
        let removed = self
            .link
            .run(|backend| async move { backend.delete(&keys).await })
            .await?;
        Ok(removed > 0)
    }

    /// Enumerate then bulk-delete. Not atomic: a key written concurrently
    /// may survive.
    async fn clear(&self, pattern: Option<&str>) -> CacheResult<()> {
        let pattern = self.scope(pattern);
        let keys = self.keys(Some(&pattern)).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let removed = self
            .link
            .run(|backend| async move { backend.delete(&keys).await })
            .await?;
        debug!(pattern = %pattern, removed, "remote clear");
        Ok(())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        self.link
            .run(|backend| async move { backend.exists(key).await })
            .await
    }

    async fn keys(&self, pattern: Option<&str>) -> CacheResult<Vec<String>> {
        let pattern = self.scope(pattern);
        self.link
            .run(|backend| async move { backend.keys(&pattern).await })
            .await
    }

    async fn size(&self) -> CacheResult<usize> {
        Ok(self.keys(None).await?.len())
    }

    fn health(&self) -> super::HealthState {
        if self.is_connected() {
            super::HealthState::Healthy
        } else {
            super::HealthState::Degraded
        }
    }

    fn destroy(&self) {
        self.stop();
        self.link.close();
    }
}
