//! In-memory fast cache for testing and single-node deployments.
//!
//! Entries expire on the tokio clock, so tests running with a paused clock
//! can advance past a freshness TTL deterministically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::foundation::SessionKey;
use crate::domain::session::SessionRecord;
use crate::ports::{CacheError, FastCache};

#[derive(Debug, Clone)]
struct CacheEntry {
    record: SessionRecord,
    fresh_until: Instant,
}

/// Hit/miss counters, for assertions and debug logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// In-memory session cache.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<SessionKey, CacheEntry>>>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    invalidations: Arc<AtomicU64>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Puts an entry in place without going through the coordinator.
    ///
    /// Lets tests plant stale data to prove it is never served after a write.
    pub async fn insert_raw(&self, record: SessionRecord, ttl: Duration) {
        self.entries.write().await.insert(
            record.key().clone(),
            CacheEntry {
                record,
                fresh_until: Instant::now() + ttl,
            },
        );
    }

    /// Whether a fresh entry exists for `key`.
    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|e| e.fresh_until > Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    async fn check_available(&self) -> Result<(), CacheError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable(
                "in-memory cache marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FastCache for InMemoryCache {
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, CacheError> {
        self.check_available().await?;

        let now = Instant::now();
        let found = {
            let entries = self.entries.read().await;
            entries
                .get(key)
                .filter(|e| e.fresh_until > now)
                .map(|e| e.record.clone())
        };

        match found {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(record))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                // Drop stale entries lazily.
                self.entries
                    .write()
                    .await
                    .retain(|k, e| k != key || e.fresh_until > now);
                Ok(None)
            }
        }
    }

    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<(), CacheError> {
        self.check_available().await?;
        self.insert_raw(record.clone(), ttl).await;
        Ok(())
    }

    async fn invalidate(&self, key: &SessionKey) -> Result<(), CacheError> {
        self.check_available().await?;
        self.entries.write().await.remove(key);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check_available().await
    }
}
