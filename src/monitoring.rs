//! The monitoring sink the cache reports to.
//!
//! The host application owns where events end up; the cache only calls the
//! three methods of [`MonitoringSink`]. [`TracingSink`] forwards everything to
//! `tracing`, which is what a cache built without an explicit sink uses.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::CacheError;

/// Receiver for cache events, classified errors and periodic metrics.
pub trait MonitoringSink: Send + Sync {
    fn track_event(&self, name: &str, attributes: &[(&str, String)]);

    fn track_error(&self, name: &str, error: &CacheError, attributes: &[(&str, String)]);

    fn track_metrics(&self, name: &str, metrics: &[(&str, f64)]);
}

/// Sink that emits `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MonitoringSink for TracingSink {
    fn track_event(&self, name: &str, attributes: &[(&str, String)]) {
        info!(target: "tiered_cache::monitoring", event = name, ?attributes);
    }

    fn track_error(&self, name: &str, error: &CacheError, attributes: &[(&str, String)]) {
        warn!(
            target: "tiered_cache::monitoring",
            event = name,
            kind = error.kind(),
            transient = error.is_transient(),
            error = %error,
            ?attributes
        );
    }

    fn track_metrics(&self, name: &str, metrics: &[(&str, f64)]) {
        info!(target: "tiered_cache::monitoring", event = name, ?metrics);
    }
}

/// What a [`RecordingSink`] captured.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Event { name: String, attributes: Vec<(String, String)> },
    Error { name: String, kind: &'static str, message: String },
    Metrics { name: String, metrics: Vec<(String, f64)> },
}

/// Sink that keeps everything in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Recorded> {
        self.records.lock().clone()
    }

    /// Kinds of all recorded errors, in order.
    pub fn error_kinds(&self) -> Vec<&'static str> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                Recorded::Error { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                Recorded::Event { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn metrics_flushes(&self) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| matches!(record, Recorded::Metrics { .. }))
            .count()
    }
}

fn owned(attributes: &[(&str, String)]) -> Vec<(String, String)> {
    attributes
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

impl MonitoringSink for RecordingSink {
    fn track_event(&self, name: &str, attributes: &[(&str, String)]) {
        self.records.lock().push(Recorded::Event {
            name: name.to_string(),
            attributes: owned(attributes),
        });
    }

    fn track_error(&self, name: &str, error: &CacheError, _attributes: &[(&str, String)]) {
        self.records.lock().push(Recorded::Error {
            name: name.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn track_metrics(&self, name: &str, metrics: &[(&str, f64)]) {
        self.records.lock().push(Recorded::Metrics {
            name: name.to_string(),
            metrics: metrics.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
        });
    }
}
