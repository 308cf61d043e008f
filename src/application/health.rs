//! Readiness probing for the three backends.
//!
//! Only the StateStore gates readiness. A node with a broken cache still
//! serves correct reads, and a broken broker only degrades event delivery.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time;

use crate::ports::{EventPublisher, FastCache, StateStore};

/// Status of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComponentStatus {
    Up,
    Down { reason: String },
}

impl ComponentStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, ComponentStatus::Up)
    }

    fn from_result<E: std::fmt::Display>(
        result: Result<Result<(), E>, time::error::Elapsed>,
        timeout: Duration,
    ) -> Self {
        match result {
            Ok(Ok(())) => ComponentStatus::Up,
            Ok(Err(e)) => ComponentStatus::Down {
                reason: e.to_string(),
            },
            Err(_) => ComponentStatus::Down {
                reason: format!("no answer within {:?}", timeout),
            },
        }
    }
}

/// Snapshot of backend health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub node_id: String,
    pub ready: bool,
    pub degraded: bool,
    pub store: ComponentStatus,
    pub cache: ComponentStatus,
    pub events: ComponentStatus,
}

/// Pings every backend concurrently.
pub struct HealthService {
    node_id: String,
    store: Arc<dyn StateStore>,
    cache: Arc<dyn FastCache>,
    publisher: Arc<dyn EventPublisher>,
    timeout: Duration,
}

impl HealthService {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn StateStore>,
        cache: Arc<dyn FastCache>,
        publisher: Arc<dyn EventPublisher>,
        timeout: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            cache,
            publisher,
            timeout,
        }
    }

    pub async fn readiness(&self) -> ReadinessReport {
        let (store, cache, events) = tokio::join!(
            time::timeout(self.timeout, self.store.ping()),
            time::timeout(self.timeout, self.cache.ping()),
            time::timeout(self.timeout, self.publisher.ping()),
        );

        let store = ComponentStatus::from_result(store, self.timeout);
        let cache = ComponentStatus::from_result(cache, self.timeout);
        let events = ComponentStatus::from_result(events, self.timeout);

        if !store.is_up() {
            tracing::warn!(status = ?store, "State store failed readiness probe");
        }

        ReadinessReport {
            node_id: self.node_id.clone(),
            ready: store.is_up(),
            degraded: !cache.is_up() || !events.is_up(),
            store,
            cache,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::InMemoryCache;
    use crate::adapters::events::InMemoryEventBus;
    use crate::adapters::storage::InMemoryStateStore;

    struct Backends {
        store: Arc<InMemoryStateStore>,
        cache: Arc<InMemoryCache>,
        bus: Arc<InMemoryEventBus>,
    }

    fn service() -> (HealthService, Backends) {
        let backends = Backends {
            store: Arc::new(InMemoryStateStore::new()),
            cache: Arc::new(InMemoryCache::new()),
            bus: Arc::new(InMemoryEventBus::new()),
        };
        let service = HealthService::new(
            "node-a",
            backends.store.clone(),
            backends.cache.clone(),
            backends.bus.clone(),
            Duration::from_millis(100),
        );
        (service, backends)
    }

    #[tokio::test]
    async fn all_backends_up() {
        let (service, _) = service();
        let report = service.readiness().await;
        assert!(report.ready);
        assert!(!report.degraded);
        assert_eq!(report.node_id, "node-a");
    }

    #[tokio::test]
    async fn cache_and_broker_outages_only_degrade() {
        let (service, backends) = service();
        backends.cache.set_unavailable(true);
        backends.bus.set_unavailable(true);

        let report = service.readiness().await;

        assert!(report.ready);
        assert!(report.degraded);
        assert!(!report.cache.is_up());
        assert!(!report.events.is_up());
    }

    #[tokio::test]
    async fn store_outage_is_not_ready() {
        let (service, backends) = service();
        backends.store.set_unavailable(true);

        let report = service.readiness().await;

        assert!(!report.ready);
        assert!(matches!(report.store, ComponentStatus::Down { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let (service, backends) = service();
        backends.store.set_latency(Duration::from_secs(5));

        let report = service.readiness().await;

        assert!(!report.ready);
    }
}
