//! # Tiered Cache
//!
//! An async key/value cache with interchangeable storage backends, pluggable
//! eviction and fail-open error handling.
//!
//! ## Features
//!
//! - **Three storage modes**: in-process memory, a shared Redis store, or a
//!   hybrid of both with automatic degradation when Redis is unreachable
//! - **TTL support**: per-entry or default expiry, swept in the background
//! - **LRU or LFU eviction** once the configured capacity is reached
//! - **Segments**: namespace keys per logical area and clear them as a group
//! - **Metrics**: hit ratio, average latency, evictions and per-segment counters
//! - **Fail-open**: backend outages turn into misses instead of errors
//!
//! ## Quick Start
//!
//! ```rust
//! use tiered_cache::{CacheConfig, CacheService};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tiered_cache::CacheResult<()> {
//! let config = CacheConfig::new()
//!     .max_size(10_000)
//!     .default_ttl(Duration::from_secs(300))
//!     .build();
//!
//! let cache: CacheService<String> = CacheService::new(config).await?;
//!
//! cache.set("user:123", "Alice".to_string()).await?;
//!
//! if let Some(value) = cache.get("user:123").await.value {
//!     println!("Found: {}", value);
//! }
//!
//! let profile = cache
//!     .get_or_fetch("user:456", || async {
//!         Ok::<_, std::io::Error>(Some("Bob".to_string()))
//!     })
//!     .await?;
//! assert_eq!(profile.as_deref(), Some("Bob"));
//!
//! let metrics = cache.metrics();
//! println!("Hit ratio: {:.1}%", metrics.hit_ratio * 100.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Hybrid mode
//!
//! With [`StorageType::Hybrid`] reads go to memory first and fall back to
//! Redis, backfilling memory on a remote hit. If Redis goes away the cache
//! keeps serving from memory and a background probe reconnects it.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod monitoring;
pub mod pattern;
pub mod policy;
pub mod storage;

pub(crate) mod entry;

pub use cache::{CacheService, CacheValue, GetResult};
pub use config::{CacheConfig, CacheOptions, EvictionStrategy, StorageType};
pub use error::{CacheError, CacheResult};
pub use metrics::{CacheMetrics, MetricsSnapshot, SegmentStats};
pub use monitoring::{MonitoringSink, Recorded, RecordingSink, TracingSink};
pub use pattern::KeyPattern;
pub use policy::{EvictionPolicy, LfuPolicy, LruPolicy};
pub use storage::{
    CacheSource, HealthState, HybridStorage, Lookup, MemoryStorage, RedisBackend, RedisConnector,
    RemoteBackend, RemoteConnector, RemoteStorage, StorageStrategy,
};

pub mod cli;
pub use cli::{Cli, CliCommand};
