//! In-Memory State Store Adapter
//!
//! Single-process authoritative store. Conditional writes run under one
//! write lock, which makes them linearizable within the process. Useful for
//! tests, development, and single-node deployments.
//!
//! Removed keys keep a tombstone slot with their last version.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::domain::foundation::{SessionKey, Timestamp};
use crate::domain::session::{SessionRecord, Version};
use crate::ports::{CasOutcome, InsertOutcome, StateStore, StateStoreError, StoreChange};

const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Slot {
    Live(SessionRecord),
    Tombstone(Version),
}

/// In-memory store for session records.
#[derive(Debug, Clone)]
pub struct InMemoryStateStore {
    records: Arc<RwLock<HashMap<SessionKey, Slot>>>,
    changes: broadcast::Sender<StoreChange>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl InMemoryStateStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            changes,
            unavailable: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fail every operation with `Unavailable` while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every operation by `latency` (used to trip caller timeouts).
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of stored records, expired ones included. Tombstones are not
    /// counted.
    pub async fn len(&self) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Version of the tombstone left under `key`, if it was removed.
    pub async fn tombstone(&self, key: &SessionKey) -> Option<Version> {
        match self.records.read().await.get(key) {
            Some(Slot::Tombstone(version)) => Some(*version),
            _ => None,
        }
    }

    async fn check_available(&self) -> Result<(), StateStoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StateStoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn notify_written(&self, record: &SessionRecord) {
        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            key: record.key().clone(),
            version: Some(record.version()),
            expires_at: Some(*record.expires_at()),
        });
    }

    fn notify_removed(&self, key: &SessionKey) {
        let _ = self.changes.send(StoreChange {
            key: key.clone(),
            version: None,
            expires_at: None,
        });
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StateStoreError> {
        self.check_available().await?;
        Ok(match self.records.read().await.get(key) {
            Some(Slot::Live(record)) => Some(record.clone()),
            _ => None,
        })
    }

    async fn put_if_absent(&self, record: &SessionRecord) -> Result<InsertOutcome, StateStoreError> {
        self.check_available().await?;
        let mut records = self.records.write().await;
        match records.get(record.key()) {
            Some(Slot::Live(existing)) => return Ok(InsertOutcome::Occupied(existing.clone())),
            Some(Slot::Tombstone(last)) if record.version() <= *last => {
                return Ok(InsertOutcome::Tombstoned(*last));
            }
            _ => {}
        }
        records.insert(record.key().clone(), Slot::Live(record.clone()));
        drop(records);

        self.notify_written(record);
        Ok(InsertOutcome::Inserted)
    }

    async fn compare_and_swap(
        &self,
        key: &SessionKey,
        expected: Version,
        record: &SessionRecord,
    ) -> Result<CasOutcome, StateStoreError> {
        self.check_available().await?;
        let mut records = self.records.write().await;
        let Some(Slot::Live(current)) = records.get_mut(key) else {
            return Ok(CasOutcome::Missing);
        };
        if current.version() != expected {
            return Ok(CasOutcome::Conflict(current.clone()));
        }
        *current = record.clone();
        drop(records);

        self.notify_written(record);
        Ok(CasOutcome::Applied)
    }

    async fn delete(
        &self,
        key: &SessionKey,
        expected: Version,
    ) -> Result<CasOutcome, StateStoreError> {
        self.check_available().await?;
        let mut records = self.records.write().await;
        let tombstone = match records.get(key) {
            Some(Slot::Live(current)) if current.version() != expected => {
                return Ok(CasOutcome::Conflict(current.clone()));
            }
            Some(Slot::Live(current)) => current.tombstone_version(),
            _ => return Ok(CasOutcome::Missing),
        };
        records.insert(key.clone(), Slot::Tombstone(tombstone));
        drop(records);

        self.notify_removed(key);
        Ok(CasOutcome::Applied)
    }

    async fn scan_expired(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<SessionRecord>, StateStoreError> {
        self.check_available().await?;
        let records = self.records.read().await;
        let mut expired: Vec<SessionRecord> = records
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(r) if r.is_expired_at(&now) => Some(r.clone()),
                _ => None,
            })
            .collect();
        expired.sort_by_key(|r| *r.expires_at());
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn ping(&self) -> Result<(), StateStoreError> {
        self.check_available().await
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<StoreChange>> {
        Some(self.changes.subscribe())
    }
}
