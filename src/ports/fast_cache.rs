//! FastCache port - Ephemeral read-through copies of session records.
//!
//! Entries carry a freshness TTL that is independent of (and normally much
//! shorter than) the session's own lifetime. The cache is never
//! authoritative: every failure is absorbed by the caller.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::foundation::SessionKey;
use crate::domain::session::SessionRecord;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cached value could not be decoded: {0}")]
    Serialization(String),
}

/// Port for the low-latency session cache.
#[async_trait]
pub trait FastCache: Send + Sync {
    /// Fetch a cached record.
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, CacheError>;

    /// Store a record for at most `ttl`.
    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<(), CacheError>;

    /// Drop the entry for `key`. Mutations invalidate rather than overwrite.
    async fn invalidate(&self, key: &SessionKey) -> Result<(), CacheError>;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> Result<(), CacheError>;
}

/// Cache that stores nothing; every read is a miss.
///
/// Used when the deployment runs without a fast cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl FastCache for NoopCache {
    async fn get(&self, _key: &SessionKey) -> Result<Option<SessionRecord>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _record: &SessionRecord, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate(&self, _key: &SessionKey) -> Result<(), CacheError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_cache_is_object_safe() {
        fn _accepts_dyn(_cache: &dyn FastCache) {}
    }

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        let key = SessionKey::new("s1").unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.invalidate(&key).await.is_ok());
    }
}
