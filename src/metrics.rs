//! Statistics and metrics for the cache.
//!
//! Global counters are atomics so the hot path never takes a lock for them.
//! The per-segment table sits behind a `parking_lot` mutex that is only held
//! for the duration of a single map update.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SegmentStats {
    pub hits: u64,
    pub misses: u64,
    /// Distinct keys currently written through this cache instance.
    pub size: u64,
}

/// Aggregate counters for one cache instance.
///
/// Use `CacheService::metrics()` to get a snapshot.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    latency_sum_ns: AtomicU64,
    latency_count: AtomicU64,
    segments: Mutex<HashMap<String, SegmentStats>>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup outcome, globally and for its segment.
    pub fn record_lookup(&self, hit: bool, segment: Option<&str>) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(segment) = segment {
            let mut segments = self.segments.lock();
            let stats = segments.entry(segment.to_string()).or_default();
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    pub fn record_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_sum_ns.fetch_add(nanos, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_segment_size(&self, segment: &str) {
        self.segments.lock().entry(segment.to_string()).or_default().size += 1;
    }

    pub fn decrement_segment_size(&self, segment: &str) {
        if let Some(stats) = self.segments.lock().get_mut(segment) {
            stats.size = stats.size.saturating_sub(1);
        }
    }

    /// Zero every counter of one segment.
    pub fn reset_segment(&self, segment: &str) {
        if let Some(stats) = self.segments.lock().get_mut(segment) {
            *stats = SegmentStats::default();
        }
    }

    /// Zero the size column of every segment; hit and miss history is kept.
    pub fn reset_segment_sizes(&self) {
        for stats in self.segments.lock().values_mut() {
            stats.size = 0;
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// `hits / (hits + misses)` in `0.0..=1.0`, zero before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Mean storage latency of lookups, zero before any lookup.
    pub fn average_latency(&self) -> Duration {
        let count = self.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.latency_sum_ns.load(Ordering::Relaxed) / count)
    }

    pub fn segment(&self, segment: &str) -> Option<SegmentStats> {
        self.segments.lock().get(segment).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let average_latency = self.average_latency();
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            hit_ratio: self.hit_ratio(),
            average_latency_ms: average_latency.as_secs_f64() * 1000.0,
            segments: self.segments.lock().clone(),
        }
    }
}

/// A point-in-time copy of the metrics, cheap to log or serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
    pub average_latency_ms: f64,
    pub segments: HashMap<String, SegmentStats>,
}

impl MetricsSnapshot {
    /// The numeric fields pushed to the monitoring sink on each flush.
    pub fn as_metric_fields(&self) -> [(&'static str, f64); 5] {
        [
            ("hits", self.hits as f64),
            ("misses", self.misses as f64),
            ("hit_ratio", self.hit_ratio),
            ("evictions", self.evictions as f64),
            ("average_latency", self.average_latency_ms),
        ]
    }
}
