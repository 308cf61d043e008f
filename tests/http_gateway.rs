//! Router-level tests for the REST gateway.
//!
//! Requests go through the full axum router (timeouts and tracing layers
//! included) via `tower::ServiceExt::oneshot`, backed by in-memory adapters.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use session_grid::adapters::cache::InMemoryCache;
use session_grid::adapters::clock::SystemClock;
use session_grid::adapters::events::InMemoryEventBus;
use session_grid::adapters::http::app_router;
use session_grid::adapters::storage::InMemoryStateStore;
use session_grid::application::{
    CoordinatorSettings, DispatcherConfig, EventDispatcher, HealthService, SessionCoordinator,
};
use session_grid::domain::foundation::NodeId;

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Gateway {
    store: Arc<InMemoryStateStore>,
    bus: Arc<InMemoryEventBus>,
    router: Router,
}

fn gateway() -> Gateway {
    let store = Arc::new(InMemoryStateStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let node = NodeId::new("node-http").unwrap();

    let dispatcher = Arc::new(EventDispatcher::spawn(
        bus.clone(),
        node.clone(),
        DispatcherConfig {
            partitions: 2,
            ack_timeout: Duration::from_secs(2),
            ..DispatcherConfig::default()
        },
    ));
    let coordinator = Arc::new(SessionCoordinator::new(
        store.clone(),
        cache.clone(),
        dispatcher,
        Arc::new(SystemClock),
        CoordinatorSettings::new(node.clone()),
    ));
    let health = Arc::new(HealthService::new(
        node.as_str(),
        store.clone(),
        cache,
        bus.clone(),
        Duration::from_millis(500),
    ));

    Gateway {
        store,
        bus,
        router: app_router(coordinator, health, Duration::from_secs(10)),
    }
}

impl Gateway {
    async fn send(&self, method: Method, uri: &str, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
        let (status, _, json) = self.send_full(method, uri, body).await;
        (status, json)
    }

    async fn send_full(
        &self,
        method: Method,
        uri: &str,
        body: Option<JsonValue>,
    ) -> (StatusCode, axum::http::HeaderMap, JsonValue) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
        (status, headers, json)
    }

    async fn create(&self, id: &str, payload: JsonValue) -> (StatusCode, JsonValue) {
        self.send(
            Method::POST,
            "/sessions",
            Some(json!({ "session_id": id, "payload": payload, "ttl_ms": 60_000 })),
        )
        .await
    }
}

// =============================================================================
// Session endpoints
// =============================================================================

#[tokio::test]
async fn create_returns_201_with_first_version() {
    let gw = gateway();

    let (status, body) = gw.create("s1", json!({"cart": []})).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["session"]["session_id"], "s1");
    assert_eq!(body["session"]["version"], 1);
    assert_eq!(body["session"]["owner_node"], "node-http");
    assert!(body.get("warnings").is_none());
}

#[tokio::test]
async fn duplicate_create_returns_409() {
    let gw = gateway();
    gw.create("s1", json!(1)).await;

    let (status, body) = gw.create("s1", json!(2)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SESSION_ALREADY_EXISTS");
}

#[tokio::test]
async fn get_returns_session_or_404() {
    let gw = gateway();
    gw.create("s1", json!({"step": 3})).await;

    let (status, body) = gw.send(Method::GET, "/sessions/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"]["step"], 3);

    let (status, body) = gw.send(Method::GET, "/sessions/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn stale_update_returns_409_with_current_record() {
    let gw = gateway();
    gw.create("s1", json!("P1")).await;
    let (status, _) = gw
        .send(
            Method::PUT,
            "/sessions/s1",
            Some(json!({ "expected_version": 1, "payload": "P2" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = gw
        .send(
            Method::PUT,
            "/sessions/s1",
            Some(json!({ "expected_version": 1, "payload": "P3" })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "VERSION_CONFLICT");
    assert_eq!(body["details"]["current_version"], 2);
    assert_eq!(body["details"]["current"]["payload"], "P2");
}

#[tokio::test]
async fn delete_requires_expected_version() {
    let gw = gateway();
    gw.create("s1", json!(null)).await;

    let (status, _) = gw.send(Method::DELETE, "/sessions/s1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = gw
        .send(Method::DELETE, "/sessions/s1?expected_version=1", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_version"], 2);

    let (status, _) = gw.send(Method::GET, "/sessions/s1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn touch_bumps_version() {
    let gw = gateway();
    gw.create("s1", json!(null)).await;

    let (status, body) = gw
        .send(
            Method::POST,
            "/sessions/s1/touch",
            Some(json!({ "extend_by_ms": 30_000 })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["version"], 2);
}

#[tokio::test]
async fn invalid_input_returns_400() {
    let gw = gateway();

    let (status, body) = gw
        .send(
            Method::POST,
            "/sessions",
            Some(json!({ "session_id": "s1", "payload": null, "ttl_ms": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["details"]["field"], "ttl_ms");

    let (status, _) = gw.send(Method::GET, "/sessions/bad%20key", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn store_outage_returns_503_with_retry_after() {
    let gw = gateway();
    gw.store.set_unavailable(true);

    let (status, headers, body) = gw.send_full(Method::GET, "/sessions/s1", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(headers.contains_key(header::RETRY_AFTER));
    assert_eq!(body["code"], "BACKEND_UNAVAILABLE");
}

#[tokio::test]
async fn broker_outage_reports_warning_beside_success() {
    let gw = gateway();
    gw.bus.set_unavailable(true);

    let (status, body) = gw.create("s1", json!(1)).await;

    assert_eq!(status, StatusCode::CREATED);
    let warnings = body["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["code"], "EVENT_PUBLISH_DEGRADED");
    assert_eq!(warnings[0]["kind"], "created");
    assert_eq!(warnings[0]["version"], 1);
}

// =============================================================================
// Health endpoints
// =============================================================================

#[tokio::test]
async fn health_is_always_ok() {
    let gw = gateway();
    gw.store.set_unavailable(true);

    let (status, body) = gw.send(Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn ready_tracks_the_state_store() {
    let gw = gateway();

    let (status, body) = gw.send(Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["node_id"], "node-http");

    gw.bus.set_unavailable(true);
    let (status, body) = gw.send(Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["degraded"], true);
    assert_eq!(body["events"]["status"], "down");

    gw.store.set_unavailable(true);
    let (status, body) = gw.send(Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
}
