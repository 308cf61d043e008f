//! Event infrastructure for domain event publishing.
//!
//! - `EventId` - Unique identifier for events (deduplication)
//! - `EventMetadata` - Transport context added by the publishing node
//! - `EventEnvelope` - Transport wrapper for domain events
//! - `DomainEvent` - Trait that all domain events implement

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

use super::{DomainError, ErrorCode, Timestamp};

/// Trait that all domain events must implement.
///
/// Provides the contract for event identification, routing, ordering, and versioning.
pub trait DomainEvent: Send + Sync {
    /// Returns the event type string (e.g., "session.updated.v1").
    /// SHOULD include version suffix for explicit versioning.
    fn event_type(&self) -> &'static str;

    /// Returns the ID of the aggregate that emitted this event.
    ///
    /// Also used as the routing key, so every event of one aggregate lands
    /// on the same ordered partition.
    fn aggregate_id(&self) -> String;

    /// Returns the type of aggregate (e.g., "Session").
    fn aggregate_type(&self) -> &'static str;

    /// Returns when the event occurred.
    fn occurred_at(&self) -> Timestamp;

    /// Returns the unique ID for this event instance.
    fn event_id(&self) -> EventId;
}

/// Extension trait that provides `to_envelope()` for serializable domain events.
///
/// Automatically implemented for any type that implements both
/// `DomainEvent` and `Serialize`.
pub trait SerializableDomainEvent: DomainEvent + Serialize {
    /// Converts this domain event into an `EventEnvelope` for transport.
    fn to_envelope(&self) -> Result<EventEnvelope, DomainError> {
        let event_type = self.event_type().to_string();
        let schema_version = schema_version_of(&event_type);
        let payload = serde_json::to_value(self).map_err(|e| {
            DomainError::new(
                ErrorCode::SerializationError,
                format!("Failed to serialize {}: {}", event_type, e),
            )
        })?;

        Ok(EventEnvelope {
            event_id: self.event_id(),
            event_type,
            schema_version,
            aggregate_id: self.aggregate_id(),
            aggregate_type: self.aggregate_type().to_string(),
            occurred_at: self.occurred_at(),
            payload,
            metadata: EventMetadata::default(),
        })
    }
}

impl<T: DomainEvent + Serialize> SerializableDomainEvent for T {}

/// Unique identifier for events (used for deduplication).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates a new random EventId using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context attached by the node that publishes the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Cluster member that committed the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_node: Option<String>,
}

/// Transport envelope for domain events.
///
/// Wraps event-specific data with metadata needed for:
/// - Routing (event_type, aggregate_id)
/// - Deduplication (event_id)
/// - Ordering (occurred_at)
/// - Versioning (schema_version)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique ID for this event instance.
    pub event_id: EventId,

    /// Event type for routing (e.g., "session.updated.v1").
    pub event_type: String,

    /// Schema version number (extracted from event_type).
    pub schema_version: u32,

    /// ID of the aggregate that emitted this event.
    pub aggregate_id: String,

    /// Type of aggregate (e.g., "Session").
    pub aggregate_type: String,

    /// When the event occurred.
    pub occurred_at: Timestamp,

    /// Event-specific payload as JSON.
    pub payload: JsonValue,

    pub metadata: EventMetadata,
}

impl EventEnvelope {
    /// Record the node that committed the change.
    pub fn with_origin_node(mut self, node: impl Into<String>) -> Self {
        self.metadata.origin_node = Some(node.into());
        self
    }
}

/// "session.updated.v2" → 2; types without a suffix are v1.
fn schema_version_of(event_type: &str) -> u32 {
    event_type
        .rsplit_once(".v")
        .and_then(|(_, version_str)| version_str.parse::<u32>().ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_generates_unique_values() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn schema_version_comes_from_type_suffix() {
        assert_eq!(schema_version_of("session.updated.v2"), 2);
        assert_eq!(schema_version_of("legacy.event"), 1);
        assert_eq!(schema_version_of("session.v"), 1);
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestTouched {
        event_id: EventId,
        session_id: String,
        occurred_at: Timestamp,
    }

    impl DomainEvent for TestTouched {
        fn event_type(&self) -> &'static str {
            "test.touched.v3"
        }

        fn aggregate_id(&self) -> String {
            self.session_id.clone()
        }

        fn aggregate_type(&self) -> &'static str {
            "TestSession"
        }

        fn occurred_at(&self) -> Timestamp {
            self.occurred_at
        }

        fn event_id(&self) -> EventId {
            self.event_id.clone()
        }
    }

    fn touched() -> TestTouched {
        TestTouched {
            event_id: EventId::new(),
            session_id: "session-456".to_string(),
            occurred_at: Timestamp::now(),
        }
    }

    #[test]
    fn domain_event_to_envelope_creates_valid_envelope() {
        let event = touched();

        let envelope = event.to_envelope().unwrap();

        assert_eq!(envelope.event_id, event.event_id);
        assert_eq!(envelope.aggregate_id, "session-456");
        assert_eq!(envelope.aggregate_type, "TestSession");
        assert_eq!(envelope.schema_version, 3);
        assert_eq!(envelope.occurred_at, event.occurred_at);
        assert_eq!(envelope.payload["session_id"], "session-456");
        assert_eq!(envelope.metadata, EventMetadata::default());
    }

    #[test]
    fn origin_node_is_serialized_only_when_set() {
        let bare = serde_json::to_value(touched().to_envelope().unwrap()).unwrap();
        assert!(bare["metadata"].get("origin_node").is_none());

        let stamped = touched().to_envelope().unwrap().with_origin_node("node-a");
        let json = serde_json::to_value(stamped).unwrap();
        assert_eq!(json["metadata"]["origin_node"], "node-a");
    }
}
