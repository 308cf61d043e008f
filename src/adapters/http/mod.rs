//! HTTP adapters - REST gateway over the session coordinator.
//!
//! Stateless: requests map one-to-one onto coordinator operations and
//! results map onto status codes.

mod health;
pub mod session;

pub use health::health_routes;
pub use session::{session_routes, SessionHandlers};

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::application::{HealthService, SessionCoordinator};

/// Builds the full application router.
///
/// Requests exceeding `request_timeout` are answered with `408`.
pub fn app_router(
    coordinator: Arc<SessionCoordinator>,
    health: Arc<HealthService>,
    request_timeout: Duration,
) -> Router {
    Router::new()
        .nest("/sessions", session_routes(SessionHandlers::new(coordinator)))
        .merge(health_routes(health))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}
