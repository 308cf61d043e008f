//! Coordinator error taxonomy and commit results.

use serde::Serialize;
use thiserror::Error;

use crate::domain::foundation::{ErrorCode, EventId, SessionKey, ValidationError};

use super::{SessionRecord, StateChangeEvent, StateChangeKind, Version};

/// Failures of a coordinator operation.
///
/// `BackendUnavailable` is reserved for the StateStore. Cache failures never
/// surface here and broker failures surface as [`PublishDegraded`] beside a
/// successful result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorError {
    #[error("Session not found: {0}")]
    NotFound(SessionKey),

    #[error("Session already exists: {0}")]
    AlreadyExists(SessionKey),

    /// Carries the authoritative record so the caller can retry with fresh data.
    #[error(
        "Version conflict on {}: expected {expected}, current {}",
        .current.key(),
        .current.version()
    )]
    VersionConflict {
        expected: Version,
        current: Box<SessionRecord>,
    },

    #[error("Field '{field}' is invalid: {message}")]
    Validation { field: String, message: String },

    #[error("State store unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    pub fn conflict(expected: Version, current: SessionRecord) -> Self {
        CoordinatorError::VersionConflict {
            expected,
            current: Box::new(current),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoordinatorError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinatorError::NotFound(_) => ErrorCode::SessionNotFound,
            CoordinatorError::AlreadyExists(_) => ErrorCode::SessionAlreadyExists,
            CoordinatorError::VersionConflict { .. } => ErrorCode::VersionConflict,
            CoordinatorError::Validation { .. } => ErrorCode::ValidationFailed,
            CoordinatorError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            CoordinatorError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the caller may retry the identical request after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::BackendUnavailable(_))
    }
}

impl From<ValidationError> for CoordinatorError {
    fn from(err: ValidationError) -> Self {
        CoordinatorError::validation(err.field().to_string(), err.to_string())
    }
}

/// Non-fatal warning: the mutation committed but its event could not be
/// delivered after bounded retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishDegraded {
    pub event_id: EventId,
    pub session_id: SessionKey,
    pub version: Version,
    pub kind: StateChangeKind,
    pub reason: String,
}

impl PublishDegraded {
    pub fn new(event: &StateChangeEvent, reason: impl Into<String>) -> Self {
        Self {
            event_id: event.event_id.clone(),
            session_id: event.session_id.clone(),
            version: event.version,
            kind: event.kind,
            reason: reason.into(),
        }
    }
}

/// Result of a committed mutation.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,

    /// The event describing the committed change.
    pub event: StateChangeEvent,

    /// Delivery problems for events emitted by this mutation.
    pub warnings: Vec<PublishDegraded>,
}

impl<T> Committed<T> {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}
