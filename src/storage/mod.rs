//! Storage backends.
//!
//! Every backend implements [`StorageStrategy`] over full keys (prefix and
//! segment already applied by the service). Backends own their entries,
//! including expiry; eviction bookkeeping lives in the service.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CacheResult;

pub mod hybrid;
pub mod memory;
pub mod redis;
pub mod remote;

pub use self::hybrid::{HealthState, HybridStorage};
pub use self::memory::MemoryStorage;
pub use self::redis::{RedisBackend, RedisConnector};
pub use self::remote::{RemoteBackend, RemoteConnector, RemoteStorage};

/// Where a hit was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Memory,
    Remote,
}

/// A value found by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<V> {
    pub value: V,
    pub source: CacheSource,
}

impl<V> Lookup<V> {
    pub fn memory(value: V) -> Self {
        Self {
            value,
            source: CacheSource::Memory,
        }
    }

    pub fn remote(value: V) -> Self {
        Self {
            value,
            source: CacheSource::Remote,
        }
    }
}

/// A key/value backend.
///
/// `pattern` arguments use the `*` wildcard syntax of [`crate::KeyPattern`].
#[async_trait]
pub trait StorageStrategy<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Fetch a live value. Expired entries are misses.
    async fn get(&self, key: &str) -> CacheResult<Option<Lookup<V>>>;

    /// Store a value, expiring after `ttl` when one is given.
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove a key, reporting whether it was present.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key, or only the keys matching `pattern`.
    async fn clear(&self, pattern: Option<&str>) -> CacheResult<()>;

    async fn has(&self, key: &str) -> CacheResult<bool>;

    async fn keys(&self, pattern: Option<&str>) -> CacheResult<Vec<String>>;

    async fn size(&self) -> CacheResult<usize>;

    /// Whether the backend can currently serve remote traffic.
    fn health(&self) -> HealthState {
        HealthState::Healthy
    }

    /// Stop background tasks and release connections. Idempotent.
    fn destroy(&self);
}
