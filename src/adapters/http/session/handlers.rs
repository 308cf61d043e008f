//! HTTP handlers for session endpoints.
//!
//! Handlers only translate between HTTP and the coordinator; every rule
//! lives in [`SessionCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::application::SessionCoordinator;
use crate::domain::foundation::SessionKey;
use crate::domain::session::{Committed, CoordinatorError, SessionRecord, Version};

use super::dto::{
    CreateSessionRequest, DeleteSessionQuery, DeleteSessionResponse, ErrorResponse,
    SessionCommandResponse, SessionResponse, TouchSessionRequest, UpdateSessionRequest,
};

/// Seconds a client should wait before retrying after `503`.
const RETRY_AFTER_SECS: &str = "1";

// ════════════════════════════════════════════════════════════════════════════
// Handler state
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct SessionHandlers {
    coordinator: Arc<SessionCoordinator>,
}

impl SessionHandlers {
    pub fn new(coordinator: Arc<SessionCoordinator>) -> Self {
        Self { coordinator }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP handlers
// ════════════════════════════════════════════════════════════════════════════

/// POST /sessions - Create a new session
pub async fn create_session(
    State(handlers): State<SessionHandlers>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let key = match SessionKey::new(req.session_id) {
        Ok(key) => key,
        Err(e) => return handle_coordinator_error(e.into()),
    };

    match handlers
        .coordinator
        .create(key, req.payload, Duration::from_millis(req.ttl_ms))
        .await
    {
        Ok(committed) => command_response(StatusCode::CREATED, committed),
        Err(e) => handle_coordinator_error(e),
    }
}

/// GET /sessions/:id - Read a live session
pub async fn get_session(
    State(handlers): State<SessionHandlers>,
    Path(session_id): Path<String>,
) -> Response {
    let key = match SessionKey::new(session_id) {
        Ok(key) => key,
        Err(e) => return handle_coordinator_error(e.into()),
    };

    match handlers.coordinator.get(&key).await {
        Ok(record) => (StatusCode::OK, Json(SessionResponse::from(&record))).into_response(),
        Err(e) => handle_coordinator_error(e),
    }
}

/// PUT /sessions/:id - Replace the payload at an expected version
pub async fn update_session(
    State(handlers): State<SessionHandlers>,
    Path(session_id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Response {
    let key = match SessionKey::new(session_id) {
        Ok(key) => key,
        Err(e) => return handle_coordinator_error(e.into()),
    };

    match handlers
        .coordinator
        .update(&key, Version::from_raw(req.expected_version), req.payload)
        .await
    {
        Ok(committed) => command_response(StatusCode::OK, committed),
        Err(e) => handle_coordinator_error(e),
    }
}

/// DELETE /sessions/:id?expected_version=N - Remove a session
pub async fn delete_session(
    State(handlers): State<SessionHandlers>,
    Path(session_id): Path<String>,
    Query(query): Query<DeleteSessionQuery>,
) -> Response {
    let key = match SessionKey::new(session_id) {
        Ok(key) => key,
        Err(e) => return handle_coordinator_error(e.into()),
    };

    match handlers
        .coordinator
        .delete(&key, Version::from_raw(query.expected_version))
        .await
    {
        Ok(committed) => {
            let response = DeleteSessionResponse {
                session_id: key.to_string(),
                deleted_version: committed.event.version.as_u64(),
                warnings: committed.warnings.into_iter().map(Into::into).collect(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => handle_coordinator_error(e),
    }
}

/// POST /sessions/:id/touch - Extend a session's lifetime
pub async fn touch_session(
    State(handlers): State<SessionHandlers>,
    Path(session_id): Path<String>,
    Json(req): Json<TouchSessionRequest>,
) -> Response {
    let key = match SessionKey::new(session_id) {
        Ok(key) => key,
        Err(e) => return handle_coordinator_error(e.into()),
    };

    match handlers
        .coordinator
        .touch(&key, Duration::from_millis(req.extend_by_ms))
        .await
    {
        Ok(committed) => command_response(StatusCode::OK, committed),
        Err(e) => handle_coordinator_error(e),
    }
}

fn command_response(status: StatusCode, committed: Committed<SessionRecord>) -> Response {
    let response = SessionCommandResponse {
        session: SessionResponse::from(&committed.value),
        warnings: committed.warnings.into_iter().map(Into::into).collect(),
    };
    (status, Json(response)).into_response()
}

// ════════════════════════════════════════════════════════════════════════════
// Error handling
// ════════════════════════════════════════════════════════════════════════════

pub(crate) fn handle_coordinator_error(error: CoordinatorError) -> Response {
    let code = error.code();
    match error {
        CoordinatorError::NotFound(key) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                code,
                format!("Session not found: {}", key),
            )),
        )
            .into_response(),
        CoordinatorError::AlreadyExists(key) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(
                code,
                format!("Session already exists: {}", key),
            )),
        )
            .into_response(),
        CoordinatorError::VersionConflict { expected, current } => {
            let message = format!(
                "Expected version {}, current version is {}",
                expected,
                current.version()
            );
            let details = json!({
                "expected_version": expected.as_u64(),
                "current_version": current.version().as_u64(),
                "current": SessionResponse::from(current.as_ref()),
            });
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new(code, message).with_details(details)),
            )
                .into_response()
        }
        CoordinatorError::Validation { field, message } => (
            StatusCode::BAD_REQUEST,
            Json(
                ErrorResponse::bad_request(format!(
                    "Validation failed for {}: {}",
                    field, message
                ))
                .with_details(json!({ "field": field })),
            ),
        )
            .into_response(),
        CoordinatorError::BackendUnavailable(reason) => {
            tracing::warn!(reason = %reason, "Request failed, state store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                Json(ErrorResponse::new(code, "State store unavailable, retry later")),
            )
                .into_response()
        }
        CoordinatorError::Internal(msg) => {
            tracing::error!(error = %msg, "Request failed with internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal("Internal error")),
            )
                .into_response()
        }
    }
}
