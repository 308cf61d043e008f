//! StateStore port - Authoritative, versioned session storage.
//!
//! The store is the single arbiter of "which write wins" across the cluster.
//! Every conditional operation must be atomic on the backend side; the
//! coordinator holds no lock state of its own.
//!
//! ## Tombstones
//!
//! Removing a session leaves a tombstone holding the version of its terminal
//! event. A later incarnation of the key must start above that version, so
//! a version number observed once for a key never names a different record.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::foundation::{SessionKey, Timestamp};
use crate::domain::session::{SessionRecord, Version};

/// Errors that can occur during state store operations.
///
/// None of these describe a version mismatch: conflicts are ordinary
/// outcomes reported through [`CasOutcome`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateStoreError {
    #[error("State store unavailable: {0}")]
    Unavailable(String),

    #[error("State store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Result of `put_if_absent`.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The record was written.
    Inserted,
    /// A record already exists under the key (it may be expired).
    Occupied(SessionRecord),
    /// The key was removed at this version and the record's version is not
    /// above it. Nothing was written.
    Tombstoned(Version),
}

/// Result of a conditional write or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The stored version matched and the change was applied.
    Applied,
    /// The stored version differs; carries the current record.
    Conflict(SessionRecord),
    /// No live record exists under the key.
    Missing,
}

/// Notification emitted by backends with server-side change listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: SessionKey,
    /// New version, `None` when the record was removed.
    pub version: Option<Version>,
    /// New expiry, `None` when the record was removed.
    pub expires_at: Option<Timestamp>,
}

/// Port for the authoritative session store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the record stored under `key`, expired or not. Tombstones read
    /// as `None`.
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StateStoreError>;

    /// Write `record` only if no record is stored under its key and its
    /// version is above the key's tombstone, if any.
    async fn put_if_absent(&self, record: &SessionRecord) -> Result<InsertOutcome, StateStoreError>;

    /// Replace the stored record with `record` only if the stored version
    /// equals `expected`.
    async fn compare_and_swap(
        &self,
        key: &SessionKey,
        expected: Version,
        record: &SessionRecord,
    ) -> Result<CasOutcome, StateStoreError>;

    /// Replace the stored record with a tombstone at `expected + 1` only if
    /// its version equals `expected`.
    async fn delete(
        &self,
        key: &SessionKey,
        expected: Version,
    ) -> Result<CasOutcome, StateStoreError>;

    /// Live records whose `expires_at` is at or before `now`, oldest first.
    async fn scan_expired(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<SessionRecord>, StateStoreError>;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> Result<(), StateStoreError>;

    /// Change feed, for backends that support server-side listeners.
    ///
    /// Returns `None` when the backend cannot push changes; callers then
    /// rely on polling.
    fn subscribe_changes(&self) -> Option<broadcast::Receiver<StoreChange>> {
        None
    }
}
