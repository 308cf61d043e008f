//! ExpirySweeper - Background eviction of expired sessions.
//!
//! Reads already treat expired records as absent; the sweeper only reclaims
//! storage and announces the expiry. Each eviction is a version-guarded
//! delete, so when several nodes sweep the same record exactly one of them
//! wins and exactly one `Expired` event is published.
//!
//! ## Wake-ups
//!
//! | Trigger | Source |
//! |---------|--------|
//! | `interval` tick | always |
//! | earliest known deadline | StateStore change feed, when available |
//! | shutdown | `watch` channel |

use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::time;

use crate::domain::foundation::{SessionKey, Timestamp};
use crate::domain::session::{CoordinatorError, StateChangeEvent, StateChangeKind};
use crate::ports::{CasOutcome, Clock, FastCache, StateStore, StateStoreError, StoreChange};

use super::{EventDispatcher, PendingAcks};

/// Sweeper tuning.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Fallback polling period.
    pub interval: Duration,

    /// Records evicted per scan.
    pub batch_size: u32,

    /// Scans per sweep before yielding to the next tick.
    pub max_batches: u32,

    pub store_timeout: Duration,
    pub cache_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 500,
            max_batches: 20,
            store_timeout: Duration::from_secs(2),
            cache_timeout: Duration::from_millis(200),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records evicted by this node.
    pub evicted: usize,
    /// Records another writer changed or removed first.
    pub skipped: usize,
    /// Evictions whose `Expired` event was not delivered.
    pub degraded: usize,
}

/// Background service that evicts expired sessions.
pub struct ExpirySweeper {
    store: Arc<dyn StateStore>,
    cache: Arc<dyn FastCache>,
    dispatcher: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn StateStore>,
        cache: Arc<dyn FastCache>,
        dispatcher: Arc<EventDispatcher>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            cache,
            dispatcher,
            clock,
            config,
        }
    }

    /// Run the sweep loop until the shutdown signal is received.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut feed = self.store.subscribe_changes();
        let mut deadline: Option<Timestamp> = None;

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            change_feed = feed.is_some(),
            "Expiry sweeper started"
        );

        loop {
            let wake_at = deadline;
            let until_deadline = async {
                match wake_at {
                    Some(at) => time::sleep(at.remaining_from(&self.clock.now())).await,
                    None => pending::<()>().await,
                }
            };
            let next_change = async {
                match feed.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => pending().await,
                }
            };

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    deadline = None;
                    self.sweep_logged().await;
                }
                _ = until_deadline => {
                    deadline = None;
                    self.sweep_logged().await;
                }
                change = next_change => match change {
                    Ok(StoreChange { expires_at: Some(at), .. }) => {
                        if deadline.map_or(true, |current| at < current) {
                            deadline = Some(at);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "Change feed lagged, sweeping now");
                        self.sweep_logged().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Change feed closed, falling back to interval");
                        feed = None;
                    }
                },
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    async fn sweep_logged(&self) {
        match self.sweep_once().await {
            Ok(report) if report.evicted > 0 || report.degraded > 0 => {
                tracing::info!(
                    evicted = report.evicted,
                    skipped = report.skipped,
                    degraded = report.degraded,
                    "Expired sessions evicted"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
        }
    }

    /// Evict everything expired as of now.
    ///
    /// Also useful for testing without running the loop.
    pub async fn sweep_once(&self) -> Result<SweepReport, CoordinatorError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut acks = Vec::new();

        for _ in 0..self.config.max_batches.max(1) {
            let batch = self
                .with_store_timeout(self.store.scan_expired(now, self.config.batch_size))
                .await?;
            let full = batch.len() as u32 >= self.config.batch_size;

            let mut evicted_in_batch = 0;
            for record in batch {
                let key = record.key().clone();
                match self
                    .with_store_timeout(self.store.delete(&key, record.version()))
                    .await?
                {
                    CasOutcome::Applied => {
                        evicted_in_batch += 1;
                        let expired = StateChangeEvent::new(
                            key.clone(),
                            record.tombstone_version(),
                            StateChangeKind::Expired,
                            now,
                        );
                        acks.push(self.dispatcher.enqueue(vec![expired]));
                        self.invalidate(&key).await;
                    }
                    CasOutcome::Conflict(_) | CasOutcome::Missing => report.skipped += 1,
                }
            }
            report.evicted += evicted_in_batch;

            // A full batch of skips would rescan the same rows.
            if !full || evicted_in_batch == 0 {
                break;
            }
        }

        report.degraded = join_all(acks.into_iter().map(PendingAcks::warnings))
            .await
            .iter()
            .map(Vec::len)
            .sum();
        Ok(report)
    }

    async fn invalidate(&self, key: &SessionKey) {
        match time::timeout(self.config.cache_timeout, self.cache.invalidate(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(session_id = %key, error = %e, "Cache invalidation failed"),
            Err(_) => tracing::warn!(session_id = %key, "Cache invalidation timed out"),
        }
    }

    async fn with_store_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, StateStoreError>>,
    ) -> Result<T, CoordinatorError> {
        match time::timeout(self.config.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CoordinatorError::BackendUnavailable(e.to_string())),
            Err(_) => Err(CoordinatorError::BackendUnavailable(format!(
                "State store timed out after {:?}",
                self.config.store_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::InMemoryCache;
    use crate::adapters::clock::ManualClock;
    use crate::adapters::events::InMemoryEventBus;
    use crate::adapters::storage::InMemoryStateStore;
    use crate::application::DispatcherConfig;
    use crate::domain::foundation::NodeId;
    use crate::domain::session::SessionRecord;
    use serde_json::json;

    struct Harness {
        store: Arc<InMemoryStateStore>,
        bus: Arc<InMemoryEventBus>,
        clock: ManualClock,
        dispatcher: Arc<EventDispatcher>,
    }

    fn harness() -> Harness {
        let bus = Arc::new(InMemoryEventBus::new());
        Harness {
            store: Arc::new(InMemoryStateStore::new()),
            dispatcher: Arc::new(EventDispatcher::spawn(
                bus.clone(),
                NodeId::new("node-a").unwrap(),
                DispatcherConfig::default(),
            )),
            bus,
            clock: ManualClock::new(Timestamp::from_unix_millis(0).unwrap()),
        }
    }

    fn sweeper(h: &Harness, batch_size: u32) -> ExpirySweeper {
        ExpirySweeper::new(
            h.store.clone(),
            Arc::new(InMemoryCache::new()),
            h.dispatcher.clone(),
            Arc::new(h.clock.clone()),
            SweeperConfig {
                batch_size,
                ..SweeperConfig::default()
            },
        )
    }

    async fn seed(h: &Harness, id: &str, ttl_ms: u64) {
        let record = SessionRecord::create(
            SessionKey::new(id).unwrap(),
            json!({}),
            Duration::from_millis(ttl_ms),
            NodeId::new("node-a").unwrap(),
            h.clock.now(),
        );
        h.store.put_if_absent(&record).await.unwrap();
    }

    #[tokio::test]
    async fn evicts_only_expired_records() {
        let h = harness();
        seed(&h, "short", 100).await;
        seed(&h, "long", 10_000).await;
        h.clock.advance(Duration::from_millis(100));

        let report = sweeper(&h, 100).sweep_once().await.unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(h.store.len().await, 1);
        let expired = h.bus.events_of_type("session.expired.v1");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].aggregate_id, "short");
        assert_eq!(expired[0].payload["version"], 2);
    }

    #[tokio::test]
    async fn drains_multiple_batches() {
        let h = harness();
        for i in 0..7 {
            seed(&h, &format!("s{}", i), 10).await;
        }
        h.clock.advance(Duration::from_secs(1));

        let report = sweeper(&h, 3).sweep_once().await.unwrap();

        assert_eq!(report.evicted, 7);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn competing_sweepers_emit_one_expired_event() {
        let h = harness();
        seed(&h, "s1", 10).await;
        h.clock.advance(Duration::from_secs(1));
        let a = sweeper(&h, 10);
        let b = sweeper(&h, 10);

        let (ra, rb) = tokio::join!(a.sweep_once(), b.sweep_once());

        assert_eq!(ra.unwrap().evicted + rb.unwrap().evicted, 1);
        assert_eq!(h.bus.events_of_type("session.expired.v1").len(), 1);
    }

    #[tokio::test]
    async fn store_outage_fails_sweep() {
        let h = harness();
        h.store.set_unavailable(true);

        let err = sweeper(&h, 10).sweep_once().await.unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn undelivered_expiry_is_counted() {
        let h = harness();
        seed(&h, "s1", 10).await;
        h.clock.advance(Duration::from_secs(1));
        h.bus.set_unavailable(true);

        let report = sweeper(&h, 10).sweep_once().await.unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(report.degraded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_broker_delays_sweep_by_one_ack_timeout() {
        struct Stalled;

        #[async_trait::async_trait]
        impl crate::ports::EventPublisher for Stalled {
            async fn publish(
                &self,
                _: crate::domain::foundation::EventEnvelope,
            ) -> Result<(), crate::domain::foundation::DomainError> {
                pending().await
            }
        }

        let h = harness();
        for i in 0..5 {
            seed(&h, &format!("s{}", i), 10).await;
        }
        h.clock.advance(Duration::from_secs(1));
        let sweeper = ExpirySweeper::new(
            h.store.clone(),
            Arc::new(InMemoryCache::new()),
            Arc::new(EventDispatcher::spawn(
                Arc::new(Stalled),
                NodeId::new("node-a").unwrap(),
                DispatcherConfig {
                    partitions: 1,
                    ack_timeout: Duration::from_secs(1),
                    ..DispatcherConfig::default()
                },
            )),
            Arc::new(h.clock.clone()),
            SweeperConfig::default(),
        );

        let started = time::Instant::now();
        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report.evicted, 5);
        assert_eq!(report.degraded, 5);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness();
        let sweeper = Arc::new(sweeper(&h, 10));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let sweeper = Arc::clone(&sweeper);
            async move { sweeper.run(rx).await }
        });
        tx.send(true).unwrap();

        time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
