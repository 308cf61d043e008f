//! HTTP DTOs for session endpoints.
//!
//! These types decouple the HTTP API from domain types, allowing independent evolution.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::ErrorCode;
use crate::domain::session::{PublishDegraded, SessionRecord};

// ════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════

/// Request to create a new session.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub session_id: String,
    #[serde(default)]
    pub payload: JsonValue,
    pub ttl_ms: u64,
}

/// Request to replace a session's payload.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSessionRequest {
    pub expected_version: u64,
    #[serde(default)]
    pub payload: JsonValue,
}

/// Request to extend a session's lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct TouchSessionRequest {
    pub extend_by_ms: u64,
}

/// Query parameters for deleting a session.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteSessionQuery {
    pub expected_version: u64,
}

// ════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════

/// Session view for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub payload: JsonValue,
    pub version: u64,
    pub owner_node: String,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
}

impl From<&SessionRecord> for SessionResponse {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.key().to_string(),
            payload: record.payload().clone(),
            version: record.version().as_u64(),
            owner_node: record.owner_node().to_string(),
            created_at: record.created_at().as_datetime().to_rfc3339(),
            updated_at: record.updated_at().as_datetime().to_rfc3339(),
            expires_at: record.expires_at().as_datetime().to_rfc3339(),
        }
    }
}

/// Non-fatal problem attached to a successful mutation.
#[derive(Debug, Clone, Serialize)]
pub struct WarningResponse {
    pub code: String,
    pub event_id: String,
    pub version: u64,
    pub kind: String,
    pub reason: String,
}

impl From<PublishDegraded> for WarningResponse {
    fn from(warning: PublishDegraded) -> Self {
        Self {
            code: "EVENT_PUBLISH_DEGRADED".to_string(),
            event_id: warning.event_id.to_string(),
            version: warning.version.as_u64(),
            kind: warning.kind.to_string(),
            reason: warning.reason,
        }
    }
}

/// Response for create, update and touch.
#[derive(Debug, Clone, Serialize)]
pub struct SessionCommandResponse {
    pub session: SessionResponse,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<WarningResponse>,
}

/// Response for delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteSessionResponse {
    pub session_id: String,
    /// Version carried by the `Deleted` event.
    pub deleted_version: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<WarningResponse>,
}

/// Standard error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{NodeId, SessionKey, Timestamp};
    use crate::domain::session::{StateChangeEvent, StateChangeKind, Version};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn create_session_request_deserializes() {
        let json = r#"{"session_id": "s1", "payload": {"cart": [1, 2]}, "ttl_ms": 60000}"#;
        let req: CreateSessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.session_id, "s1");
        assert_eq!(req.payload["cart"][1], 2);
        assert_eq!(req.ttl_ms, 60_000);
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let req: UpdateSessionRequest =
            serde_json::from_str(r#"{"expected_version": 3}"#).unwrap();
        assert_eq!(req.expected_version, 3);
        assert!(req.payload.is_null());
    }

    #[test]
    fn session_response_conversion() {
        let record = SessionRecord::create(
            SessionKey::new("s1").unwrap(),
            json!({"a": 1}),
            Duration::from_secs(60),
            NodeId::new("node-a").unwrap(),
            Timestamp::from_unix_millis(0).unwrap(),
        );

        let response = SessionResponse::from(&record);

        assert_eq!(response.session_id, "s1");
        assert_eq!(response.version, 1);
        assert_eq!(response.owner_node, "node-a");
        assert_eq!(response.created_at, "1970-01-01T00:00:00+00:00");
        assert_eq!(response.expires_at, "1970-01-01T00:01:00+00:00");
    }

    #[test]
    fn empty_warnings_are_omitted() {
        let response = DeleteSessionResponse {
            session_id: "s1".to_string(),
            deleted_version: 3,
            warnings: Vec::new(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn warning_response_names_event() {
        let event = StateChangeEvent::new(
            SessionKey::new("s1").unwrap(),
            Version::from_raw(2),
            StateChangeKind::Updated,
            Timestamp::now(),
        );
        let warning = WarningResponse::from(PublishDegraded::new(&event, "broker down"));

        assert_eq!(warning.code, "EVENT_PUBLISH_DEGRADED");
        assert_eq!(warning.version, 2);
        assert_eq!(warning.kind, "updated");
        assert_eq!(warning.event_id, event.event_id.to_string());
    }

    #[test]
    fn error_response_uses_error_code_string() {
        let err = ErrorResponse::new(ErrorCode::SessionNotFound, "gone");
        assert_eq!(err.code, "SESSION_NOT_FOUND");
        assert!(err.details.is_none());
    }
}
