//! Session state-change events.
//!
//! Events carry a pointer to the new state (key + version), never the
//! payload. Subscribers re-read the StateStore for the body, which makes
//! duplicate deliveries and cross-session reordering harmless.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::domain::foundation::{DomainEvent, EventId, SessionKey, Timestamp};

use super::Version;

/// What happened to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChangeKind {
    Created,
    Updated,
    Expired,
    Deleted,
}

impl StateChangeKind {
    /// Event type string used for routing.
    pub fn event_type(&self) -> &'static str {
        match self {
            StateChangeKind::Created => "session.created.v1",
            StateChangeKind::Updated => "session.updated.v1",
            StateChangeKind::Expired => "session.expired.v1",
            StateChangeKind::Deleted => "session.deleted.v1",
        }
    }
}

impl fmt::Display for StateChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateChangeKind::Created => "created",
            StateChangeKind::Updated => "updated",
            StateChangeKind::Expired => "expired",
            StateChangeKind::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

/// Published after every committed session mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    /// Unique identifier for this event (consumer-side deduplication).
    pub event_id: EventId,

    /// Session the change applies to; also the routing key.
    pub session_id: SessionKey,

    /// Version produced by the change.
    pub version: Version,

    pub kind: StateChangeKind,

    /// Commit time of the change.
    pub timestamp: Timestamp,
}

impl StateChangeEvent {
    pub fn new(
        session_id: SessionKey,
        version: Version,
        kind: StateChangeKind,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            session_id,
            version,
            kind,
            timestamp,
        }
    }

    /// Ordered partition this event is routed to.
    pub fn partition(&self, partitions: u32) -> u32 {
        partition_for(self.session_id.as_str(), partitions)
    }
}

impl DomainEvent for StateChangeEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn aggregate_id(&self) -> String {
        self.session_id.to_string()
    }

    fn aggregate_type(&self) -> &'static str {
        "Session"
    }

    fn occurred_at(&self) -> Timestamp {
        self.timestamp
    }

    fn event_id(&self) -> EventId {
        self.event_id.clone()
    }
}

/// Maps a routing key onto one of `partitions` buckets.
///
/// Uses SHA-256 so every node and every process version agrees on the
/// assignment; `std`'s hasher makes no such promise.
pub fn partition_for(routing_key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(routing_key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(partitions)) as u32
}
