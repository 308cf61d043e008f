//! HTTP routes for session endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    create_session, delete_session, get_session, touch_session, update_session, SessionHandlers,
};

/// Creates the session router with all endpoints.
///
/// Routes (relative to the mount point):
/// - `POST /` - Create a session
/// - `GET /:id` - Read a session
/// - `PUT /:id` - Update at an expected version
/// - `DELETE /:id?expected_version=N` - Delete at an expected version
/// - `POST /:id/touch` - Extend the expiry
pub fn session_routes(handlers: SessionHandlers) -> Router {
    Router::new()
        .route("/", post(create_session))
        .route(
            "/:id",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/:id/touch", post(touch_session))
        .with_state(handlers)
}
