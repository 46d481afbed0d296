//! Error types for the cache layer.
//!
//! Most failures inside the cache are fail-open: they are reported to the
//! monitoring sink and turned into misses. The variants here still need to be
//! precise, because the hybrid backend decides whether to degrade based on
//! [`CacheError::is_transient`], and the service decides what to surface based
//! on [`CacheError::is_serialization`].

use std::error::Error as StdError;
use std::time::Duration;

/// Lower-cased message fragments that identify a transient connection problem.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timed out",
    "timeout",
    "connection refused",
    "econnrefused",
    "connection closed",
    "connection reset",
    "econnreset",
    "broken pipe",
    "not connected",
    "readonly",
    "read-only",
];

/// The main error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The remote store is known to be disconnected. Distinct from a miss.
    #[error("remote store is not connected")]
    NotConnected,

    /// The remote store could not be reached or dropped the connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A remote operation did not complete within the configured bound.
    #[error("remote operation timed out after {0:?}")]
    Timeout(Duration),

    /// A value could not be represented in the backend's wire format.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote store answered with an error.
    #[error("backend error: {0}")]
    Backend(String),

    /// The fetcher passed to `get_or_fetch` failed.
    #[error("fetcher failed: {0}")]
    Fetcher(#[source] Box<dyn StdError + Send + Sync>),

    /// Eviction bookkeeping referenced a key the storage no longer holds.
    #[error("eviction candidate '{0}' is absent from storage")]
    PolicyInvariant(String),

    /// The configuration cannot be used to build a cache.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether this error looks like a transient connection failure.
    ///
    /// Transient errors push the hybrid backend into degraded mode
    /// immediately instead of waiting for the next health probe.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::NotConnected | CacheError::Timeout(_) => true,
            CacheError::Connection(msg) | CacheError::Backend(msg) => {
                let msg = msg.to_lowercase();
                TRANSIENT_SIGNATURES.iter().any(|sig| msg.contains(sig))
            }
            _ => false,
        }
    }

    /// Whether the value itself was rejected by the serializer.
    pub fn is_serialization(&self) -> bool {
        matches!(self, CacheError::Serialization(_))
    }

    /// Short, stable label used as the error name for the monitoring sink.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::NotConnected => "not_connected",
            CacheError::Connection(_) => "connection",
            CacheError::Timeout(_) => "timeout",
            CacheError::Serialization(_) => "serialization",
            CacheError::Backend(_) => "backend",
            CacheError::Fetcher(_) => "fetcher",
            CacheError::PolicyInvariant(_) => "policy_invariant",
            CacheError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// A specialized Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CacheError::NotConnected.to_string(),
            "remote store is not connected"
        );
        assert_eq!(
            CacheError::PolicyInvariant("app:a".to_string()).to_string(),
            "eviction candidate 'app:a' is absent from storage"
        );
        assert_eq!(
            CacheError::Config("max_size must be positive".to_string()).to_string(),
            "invalid configuration: max_size must be positive"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(CacheError::NotConnected.is_transient());
        assert!(CacheError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(CacheError::Connection("Connection refused (os error 111)".into()).is_transient());
        assert!(CacheError::Backend("READONLY You can't write against a read only replica".into())
            .is_transient());
        assert!(CacheError::Connection("broken pipe".into()).is_transient());

        assert!(!CacheError::Backend("WRONGTYPE Operation against a key".into()).is_transient());
        assert!(!CacheError::Serialization("key must be a string".into()).is_transient());
        assert!(!CacheError::Config("missing remote_url".into()).is_transient());
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let cache_err: CacheError = err.into();
        assert!(cache_err.is_serialization());
        assert_eq!(cache_err.kind(), "serialization");
    }

    #[test]
    fn test_fetcher_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "upstream down");
        let err = CacheError::Fetcher(Box::new(io));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "fetcher failed: upstream down");
    }
}
