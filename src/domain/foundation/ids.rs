//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

/// Maximum length of a session key in bytes.
pub const MAX_SESSION_KEY_LEN: usize = 256;

/// Opaque, caller-chosen key identifying one session across the cluster.
///
/// Keys are used verbatim as StateStore primary keys, FastCache keys and
/// event routing keys, so they must be non-empty, bounded, and free of
/// whitespace or control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

impl SessionKey {
    /// Creates a new SessionKey, validating its shape.
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::empty_field("session_id"));
        }
        if key.len() > MAX_SESSION_KEY_LEN {
            return Err(ValidationError::invalid_format(
                "session_id",
                format!("must be at most {} bytes", MAX_SESSION_KEY_LEN),
            ));
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::invalid_format(
                "session_id",
                "must not contain whitespace or control characters",
            ));
        }
        Ok(Self(key))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

/// Identifier of the cluster member that performed a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a NodeId, returning error if empty.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::empty_field("node_id"));
        }
        Ok(Self(id))
    }

    /// Generates a random node identifier for processes started without one.
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("node-{}", &uuid[..12]))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_accepts_opaque_strings() {
        let key = SessionKey::new("tenant-7/game:42").unwrap();
        assert_eq!(key.as_str(), "tenant-7/game:42");
        assert_eq!(format!("{}", key), "tenant-7/game:42");
    }

    #[test]
    fn session_key_rejects_empty_string() {
        match SessionKey::new("") {
            Err(ValidationError::EmptyField { field }) => assert_eq!(field, "session_id"),
            other => panic!("Expected EmptyField error, got {:?}", other),
        }
    }

    #[test]
    fn session_key_rejects_whitespace() {
        assert!(SessionKey::new("has space").is_err());
        assert!(SessionKey::new("tab\tkey").is_err());
    }

    #[test]
    fn session_key_rejects_oversized_keys() {
        let long = "k".repeat(MAX_SESSION_KEY_LEN + 1);
        assert!(SessionKey::new(long).is_err());
        assert!(SessionKey::new("k".repeat(MAX_SESSION_KEY_LEN)).is_ok());
    }

    #[test]
    fn session_key_deserialization_validates() {
        let ok: Result<SessionKey, _> = serde_json::from_str("\"s1\"");
        assert!(ok.is_ok());

        let bad: Result<SessionKey, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[test]
    fn node_id_rejects_blank() {
        assert!(NodeId::new("  ").is_err());
        assert_eq!(NodeId::new("node-a").unwrap().as_str(), "node-a");
    }

    #[test]
    fn generated_node_ids_are_distinct() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("node-"));
    }
}
