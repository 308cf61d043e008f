//! Session record aggregate.
//!
//! A session is the unit of shared, versioned cluster state. Records are
//! immutable values: every mutation produces a successor record with the next
//! version, which the coordinator then installs through compare-and-swap.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;

use crate::domain::foundation::{NodeId, SessionKey, Timestamp};

/// Monotonically increasing version of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version assigned to a freshly created session.
    pub const INITIAL: Version = Version(1);

    /// Wraps a raw version number read from storage or a request.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw version number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The version following this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session record - one versioned unit of shared state.
///
/// # Invariants
///
/// - `version` strictly increases on every successful write to the same key
/// - `updated_at` is the commit time of the write that produced `version`
/// - `payload` is opaque to the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    key: SessionKey,
    payload: JsonValue,
    version: Version,
    owner_node: NodeId,
    created_at: Timestamp,
    updated_at: Timestamp,
    expires_at: Timestamp,
}

impl SessionRecord {
    /// Builds the first record for a key.
    pub fn create(
        key: SessionKey,
        payload: JsonValue,
        ttl: Duration,
        owner_node: NodeId,
        now: Timestamp,
    ) -> Self {
        Self {
            key,
            payload,
            version: Version::INITIAL,
            owner_node,
            created_at: now,
            updated_at: now,
            expires_at: now.plus(ttl),
        }
    }

    /// Builds the first record for a key whose previous incarnation ended
    /// at `tombstone`. Versions continue above it.
    pub fn recreate(
        key: SessionKey,
        tombstone: Version,
        payload: JsonValue,
        ttl: Duration,
        owner_node: NodeId,
        now: Timestamp,
    ) -> Self {
        Self {
            version: tombstone.next(),
            ..Self::create(key, payload, ttl, owner_node, now)
        }
    }

    /// Builds a fresh record replacing an expired one under the same key.
    ///
    /// The version skips one step: `expired.version + 1` belongs to the
    /// `Expired` event of the replaced record.
    pub fn create_over(
        expired: &SessionRecord,
        payload: JsonValue,
        ttl: Duration,
        owner_node: NodeId,
        now: Timestamp,
    ) -> Self {
        Self::recreate(
            expired.key.clone(),
            expired.tombstone_version(),
            payload,
            ttl,
            owner_node,
            now,
        )
    }

    /// Rebuilds a record from persisted state.
    pub fn reconstitute(
        key: SessionKey,
        payload: JsonValue,
        version: Version,
        owner_node: NodeId,
        created_at: Timestamp,
        updated_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            key,
            payload,
            version,
            owner_node,
            created_at,
            updated_at,
            expires_at,
        }
    }

    /// Successor record carrying a new payload.
    pub fn with_payload(&self, payload: JsonValue, owner_node: NodeId, now: Timestamp) -> Self {
        Self {
            payload,
            version: self.version.next(),
            owner_node,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Successor record whose expiry is pushed back by `extend_by`, but
    /// never past `latest_expiry`.
    pub fn extended(
        &self,
        extend_by: Duration,
        latest_expiry: Timestamp,
        owner_node: NodeId,
        now: Timestamp,
    ) -> Self {
        Self {
            version: self.version.next(),
            owner_node,
            updated_at: now,
            expires_at: self.expires_at.plus(extend_by).min(latest_expiry),
            ..self.clone()
        }
    }

    /// Whether the record's lifetime has elapsed at `now`.
    pub fn is_expired_at(&self, now: &Timestamp) -> bool {
        !now.is_before(&self.expires_at)
    }

    /// Version carried by the terminal event (`Deleted`/`Expired`) of this record.
    pub fn tombstone_version(&self) -> Version {
        self.version.next()
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn owner_node(&self) -> &NodeId {
        &self.owner_node
    }

    pub fn created_at(&self) -> &Timestamp {
        &self.created_at
    }

    pub fn updated_at(&self) -> &Timestamp {
        &self.updated_at
    }

    pub fn expires_at(&self) -> &Timestamp {
        &self.expires_at
    }
}
