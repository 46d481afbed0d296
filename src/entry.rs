//! Cache entry with metadata for TTL and access tracking.

use std::time::{Duration, Instant};

/// A single in-process cache entry containing the value and metadata.
///
/// Each entry tracks:
/// - The stored value
/// - When the entry expires (if TTL is set)
/// - When the entry was created and last read
/// - How many times it has been read
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub(crate) value: V,

    /// When this entry expires. `None` means no expiration.
    pub(crate) expires_at: Option<Instant>,

    pub(crate) created_at: Instant,

    pub(crate) last_accessed: Instant,

    pub(crate) access_count: u64,
}

impl<V> Entry<V> {
    /// Create a new entry, expiring after `ttl` when one is given.
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Create a new entry with an absolute expiration time.
    #[cfg(test)]
    pub fn with_expiration(value: V, expires_at: Instant) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: Some(expires_at),
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check if this entry has expired at a given time.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// Record a read: refresh the access time and bump the counter.
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }

    /// Remaining lifetime, `None` when the entry never expires.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }
}
