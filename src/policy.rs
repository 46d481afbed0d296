//! Eviction policies.
//!
//! A policy only keeps bookkeeping about keys; it never touches the stored
//! values. The service updates the policy together with the storage so both
//! hold the same key set between operations.

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::config::EvictionStrategy;

/// Decides which key to drop when the cache is full.
pub trait EvictionPolicy: Send + Sync + std::fmt::Debug {
    /// A stored key was read.
    fn record_access(&mut self, key: &str);

    /// A key was written.
    fn record_set(&mut self, key: &str);

    /// The key that should be evicted next, `None` when nothing is tracked.
    fn eviction_candidate(&self) -> Option<String>;

    /// Forget a key. Removing an unknown key is a no-op.
    fn remove_key(&mut self, key: &str);

    /// Take the next candidate out of the bookkeeping, so no other caller
    /// can pick the same key.
    fn pop_candidate(&mut self) -> Option<String> {
        let key = self.eviction_candidate()?;
        self.remove_key(&key);
        Some(key)
    }

    fn clear(&mut self);

    fn contains(&self, key: &str) -> bool;

    /// Every tracked key, in no particular order.
    fn keys(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the policy selected by the configuration.
pub fn for_strategy(strategy: EvictionStrategy) -> Box<dyn EvictionPolicy> {
    match strategy {
        EvictionStrategy::Lru => Box::new(LruPolicy::new()),
        EvictionStrategy::Lfu => Box::new(LfuPolicy::new()),
    }
}

/// Least-recently-used policy.
///
/// `IndexMap` keeps keys ordered from least to most recently touched; a touch
/// moves the key to the end, so the candidate is always the first key.
#[derive(Debug, Default)]
pub struct LruPolicy {
    order: IndexMap<String, u64>,
    clock: u64,
}

impl LruPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, key: &str) {
        self.clock += 1;
        let stamp = self.clock;
        match self.order.get_index_of(key) {
            Some(idx) => {
                self.order[idx] = stamp;
                let last = self.order.len() - 1;
                self.order.move_index(idx, last);
            }
            None => {
                self.order.insert(key.to_string(), stamp);
            }
        }
    }

    /// Logical timestamp of the last touch, for diagnostics.
    pub fn last_touched(&self, key: &str) -> Option<u64> {
        self.order.get(key).copied()
    }
}

impl EvictionPolicy for LruPolicy {
    fn record_access(&mut self, key: &str) {
        self.touch(key);
    }

    fn record_set(&mut self, key: &str) {
        self.touch(key);
    }

    fn eviction_candidate(&self) -> Option<String> {
        self.order.first().map(|(key, _)| key.clone())
    }

    fn remove_key(&mut self, key: &str) {
        self.order.shift_remove(key);
    }

    fn pop_candidate(&mut self) -> Option<String> {
        self.order.shift_remove_index(0).map(|(key, _)| key)
    }

    fn clear(&mut self) {
        self.order.clear();
    }

    fn contains(&self, key: &str) -> bool {
        self.order.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.order.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct Usage {
    frequency: u64,
    last_touched: u64,
}

/// Least-frequently-used policy; ties go to the key touched longest ago.
#[derive(Debug, Default)]
pub struct LfuPolicy {
    usage: HashMap<String, Usage>,
    clock: u64,
}

impl LfuPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn frequency(&self, key: &str) -> Option<u64> {
        self.usage.get(key).map(|usage| usage.frequency)
    }
}

impl EvictionPolicy for LfuPolicy {
    fn record_access(&mut self, key: &str) {
        let now = self.tick();
        let usage = self.usage.entry(key.to_string()).or_insert(Usage {
            frequency: 0,
            last_touched: now,
        });
        usage.frequency += 1;
        usage.last_touched = now;
    }

    fn record_set(&mut self, key: &str) {
        // the write itself counts as the first touch
        let now = self.tick();
        self.usage.insert(
            key.to_string(),
            Usage {
                frequency: 1,
                last_touched: now,
            },
        );
    }

    fn eviction_candidate(&self) -> Option<String> {
        self.usage
            .iter()
            .min_by_key(|(_, usage)| (usage.frequency, usage.last_touched))
            .map(|(key, _)| key.clone())
    }

    fn remove_key(&mut self, key: &str) {
        self.usage.remove(key);
    }

    fn clear(&mut self) {
        self.usage.clear();
    }

    fn contains(&self, key: &str) -> bool {
        self.usage.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.usage.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.usage.len()
    }
}
