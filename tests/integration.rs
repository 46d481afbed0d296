//! Integration tests for the memory-backed cache service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tiered_cache::{
    CacheConfig, CacheError, CacheOptions, CacheService, EvictionStrategy, RecordingSink,
};

fn config() -> CacheConfig {
    CacheConfig::new()
        .max_size(1000)
        .cleanup_interval(Duration::ZERO)
        .metrics_flush_interval(Duration::ZERO)
        .build()
}

async fn cache(config: CacheConfig) -> CacheService<i64> {
    CacheService::new(config).await.unwrap()
}

#[tokio::test]
async fn test_basic_workflow() {
    let cache = cache(config()).await;

    assert_eq!(cache.size().await, 0);

    cache.set("key1", 1).await.unwrap();
    assert_eq!(cache.size().await, 1);

    let result = cache.get("key1").await;
    assert!(result.hit);
    assert_eq!(result.value, Some(1));

    assert!(cache.has("key1", None).await);
    assert!(!cache.has("nonexistent", None).await);

    assert!(cache.invalidate("key1", None).await);
    assert!(!cache.has("key1", None).await);
    assert!(!cache.invalidate("key1", None).await);

    cache.set("a", 1).await.unwrap();
    cache.set("b", 2).await.unwrap();
    cache.set("c", 3).await.unwrap();
    assert_eq!(cache.size().await, 3);
    cache.clear(None).await;
    assert_eq!(cache.size().await, 0);
    assert!(!cache.get("a").await.hit);
    assert_eq!(cache.tracked_keys(), 0);
}

#[tokio::test]
async fn test_miss_has_no_value() {
    let cache = cache(config()).await;
    let result = cache.get("never-set").await;
    assert!(!result.hit);
    assert!(result.value.is_none());
    assert!(result.source.is_none());
}

#[tokio::test]
async fn test_ttl_expiration() {
    let cache = cache(config()).await;
    let short = CacheOptions::new().ttl(Duration::from_millis(50));

    cache.set_with("expiring", 1, &short).await.unwrap();
    assert!(cache.get_with("expiring", &short).await.hit);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!cache.get_with("expiring", &short).await.hit);
}

#[tokio::test]
async fn test_default_ttl_applies() {
    let cache = cache(config().default_ttl(Duration::from_millis(30))).await;
    cache.set("k", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!cache.get("k").await.hit);
}

#[tokio::test]
async fn test_lru_end_to_end() {
    let cache = cache(config().max_size(2).eviction_strategy(EvictionStrategy::Lru)).await;

    cache.set("a", 1).await.unwrap();
    cache.set("b", 2).await.unwrap();
    assert!(cache.get("a").await.hit);
    cache.set("c", 3).await.unwrap();

    assert!(!cache.get("b").await.hit);
    assert!(cache.get("a").await.hit);
    assert!(cache.get("c").await.hit);
    assert_eq!(cache.metrics().evictions, 1);
}

#[tokio::test]
async fn test_lru_eviction() {
    let cache = cache(config().max_size(3)).await;

    cache.set("a", 1).await.unwrap();
    cache.set("b", 2).await.unwrap();
    cache.set("c", 3).await.unwrap();
    assert_eq!(cache.size().await, 3);

    let _ = cache.get("a").await;

    cache.set("d", 4).await.unwrap();
    assert_eq!(cache.size().await, 3);

    assert!(cache.has("a", None).await);
    assert!(!cache.has("b", None).await);
    assert!(cache.has("c", None).await);
    assert!(cache.has("d", None).await);
}

#[tokio::test]
async fn test_lfu_tie_breaks_on_oldest() {
    let cache = cache(config().max_size(3).eviction_strategy(EvictionStrategy::Lfu)).await;

    cache.set("a", 1).await.unwrap();
    cache.set("b", 2).await.unwrap();
    cache.set("c", 3).await.unwrap();
    // all at frequency 2, "b" touched longest ago
    cache.get("b").await;
    cache.get("a").await;
    cache.get("c").await;

    cache.set("d", 4).await.unwrap();

    assert!(!cache.has("b", None).await);
    assert!(cache.has("a", None).await);
    assert!(cache.has("c", None).await);
}

#[tokio::test]
async fn test_max_size_plus_one_evicts_once() {
    let cache = cache(config().max_size(10)).await;
    for i in 0..11 {
        cache.set(&format!("key_{}", i), i).await.unwrap();
    }
    assert_eq!(cache.metrics().evictions, 1);
    assert_eq!(cache.size().await, 10);
    assert!(!cache.has("key_0", None).await);
}

#[tokio::test]
async fn test_overwrite_preserves_capacity() {
    let cache = cache(config().max_size(3)).await;

    cache.set("a", 1).await.unwrap();
    cache.set("b", 2).await.unwrap();
    cache.set("c", 3).await.unwrap();

    cache.set("a", 10).await.unwrap();
    assert_eq!(cache.size().await, 3);
    assert!(cache.has("b", None).await);
    assert!(cache.has("c", None).await);
    assert_eq!(cache.get("a").await.value, Some(10));
}

#[tokio::test]
async fn test_invalidate_forgets_bookkeeping() {
    let cache = cache(config().max_size(2)).await;
    cache.set("a", 1).await.unwrap();
    cache.set("b", 2).await.unwrap();
    assert!(cache.invalidate("a", None).await);
    assert_eq!(cache.tracked_keys(), 1);

    // room for one more without evicting
    cache.set("c", 3).await.unwrap();
    assert_eq!(cache.metrics().evictions, 0);
}

#[tokio::test]
async fn test_segments_are_isolated() {
    let cache = cache(config()).await;
    let weather = CacheOptions::new().segment("weather");
    let routes = CacheOptions::new().segment("routes");

    cache.set_with("berlin", 21, &weather).await.unwrap();
    cache.set_with("paris", 18, &weather).await.unwrap();
    cache.set_with("berlin", 7, &routes).await.unwrap();
    cache.set("plain", 0).await.unwrap();

    assert_eq!(cache.get_with("berlin", &weather).await.value, Some(21));
    assert_eq!(cache.get_with("berlin", &routes).await.value, Some(7));

    let mut weather_keys = cache.keys(Some("weather")).await;
    weather_keys.sort();
    assert_eq!(weather_keys, vec!["app:weather:berlin", "app:weather:paris"]);

    cache.clear(Some("weather")).await;

    assert!(!cache.get_with("berlin", &weather).await.hit);
    assert!(!cache.get_with("paris", &weather).await.hit);
    assert!(cache.get_with("berlin", &routes).await.hit);
    assert!(cache.get("plain").await.hit);
    assert_eq!(cache.tracked_keys(), 2);

    let metrics = cache.metrics();
    let weather_stats = metrics.segments.get("weather").copied().unwrap_or_default();
    assert_eq!(weather_stats.size, 0);
    assert_eq!(weather_stats.hits, 0);
    assert_eq!(metrics.segments["routes"].size, 1);
}

#[tokio::test]
async fn test_segment_size_follows_invalidate() {
    let cache = cache(config()).await;
    let weather = CacheOptions::new().segment("weather");
    cache.set_with("a", 1, &weather).await.unwrap();
    cache.set_with("b", 2, &weather).await.unwrap();
    cache.set_with("a", 3, &weather).await.unwrap();
    assert_eq!(cache.metrics().segments["weather"].size, 2);

    assert!(cache.invalidate("a", Some("weather")).await);
    assert_eq!(cache.metrics().segments["weather"].size, 1);
}

#[tokio::test]
async fn test_segmentation_disabled_flattens_keys() {
    let cache = cache(config().segmentation(false)).await;
    let weather = CacheOptions::new().segment("weather");

    cache.set_with("berlin", 21, &weather).await.unwrap();
    assert!(cache.get("berlin").await.hit);
    assert_eq!(cache.keys(None).await, vec!["app:berlin"]);
    assert!(cache.metrics().segments.is_empty());
}

#[tokio::test]
async fn test_hit_ratio() {
    let cache = cache(config()).await;
    cache.set("k", 1).await.unwrap();
    for _ in 0..3 {
        assert!(cache.get("k").await.hit);
    }
    assert!(!cache.get("missing").await.hit);

    let metrics = cache.metrics();
    assert_eq!(metrics.hits, 3);
    assert_eq!(metrics.misses, 1);
    assert!((metrics.hit_ratio - 0.75).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_get_or_fetch_runs_fetcher_once() {
    let cache = cache(config()).await;
    let calls = AtomicUsize::new(0);

    let fetched = cache
        .get_or_fetch("user:1", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(Some(42))
        })
        .await
        .unwrap();
    assert_eq!(fetched, Some(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("user:1").await.value, Some(42));

    let cached = cache
        .get_or_fetch("user:1", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(Some(0))
        })
        .await
        .unwrap();
    assert_eq!(cached, Some(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_or_fetch_none_is_not_cached() {
    let cache = cache(config()).await;
    let fetched = cache
        .get_or_fetch("absent", || async { Ok::<_, std::io::Error>(None) })
        .await
        .unwrap();
    assert_eq!(fetched, None);
    assert_eq!(cache.size().await, 0);
}

#[tokio::test]
async fn test_get_or_fetch_surfaces_fetcher_error() {
    let sink = Arc::new(RecordingSink::new());
    let cache: CacheService<i64> = CacheService::with_sink(config(), sink.clone()).await.unwrap();

    let err = cache
        .get_or_fetch("k", || async {
            Err::<Option<i64>, _>(std::io::Error::new(std::io::ErrorKind::Other, "upstream down"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Fetcher(_)));
    assert!(err.to_string().contains("upstream down"));
    assert_eq!(sink.error_kinds(), vec!["fetcher"]);
    assert!(!cache.has("k", None).await);
}

#[tokio::test]
async fn test_concurrent_misses_each_fetch() {
    let cache = Arc::new(cache(config()).await);
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, std::io::Error>(Some(1))
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Some(1));
    }
    // no request coalescing
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes() {
    let cache = Arc::new(cache(config().max_size(10_000)).await);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for i in 0..500 {
                    let key = format!("task_{}_key_{}", t, i);
                    cache.set(&key, i).await.unwrap();
                    let _ = cache.get(&key).await;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("task panicked");
    }

    assert_eq!(cache.size().await, 4000);
    assert_eq!(cache.tracked_keys(), 4000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_writes_respect_max_size() {
    let sink = Arc::new(RecordingSink::new());
    let cache: Arc<CacheService<i64>> = Arc::new(
        CacheService::with_sink(config().max_size(10), sink.clone())
            .await
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for i in 0..500 {
                    cache.set(&format!("task_{}_key_{}", t, i), i).await.unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("task panicked");
    }

    assert_eq!(cache.size().await, 10);
    assert_eq!(cache.tracked_keys(), 10);
    assert_eq!(cache.metrics().evictions, 3990);
    assert!(!sink.error_kinds().contains(&"policy_invariant"));
}

#[tokio::test]
async fn test_independent_instances() {
    let first = cache(config()).await;
    let second = cache(config()).await;

    first.set("k", 1).await.unwrap();
    assert!(!second.get("k").await.hit);
    assert_eq!(second.metrics().misses, 1);
    assert_eq!(first.metrics().misses, 0);
}

#[tokio::test]
async fn test_destroy_leaves_data_readable() {
    let cache: CacheService<i64> = CacheService::new(
        CacheConfig::new().cleanup_interval(Duration::from_millis(10)).build(),
    )
    .await
    .unwrap();
    cache.set("k", 1).await.unwrap();
    cache.destroy();
    assert!(cache.get("k").await.hit);
}

#[tokio::test]
async fn test_structured_values() {
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Forecast {
        city: String,
        temps: Vec<i32>,
    }

    let cache: CacheService<Forecast> = CacheService::new(config()).await.unwrap();
    let forecast = Forecast {
        city: "Berlin".to_string(),
        temps: vec![18, 21, 19],
    };
    cache.set("berlin", forecast.clone()).await.unwrap();
    assert_eq!(cache.get("berlin").await.value, Some(forecast));
}
