//! EventDispatcher - Ordered, cancellation-safe delivery of state changes.
//!
//! Events are routed to one of N partition workers by a stable hash of the
//! session id. Each worker publishes its queue strictly in order, so two
//! events of the same session can never overtake each other inside one
//! process, while unrelated sessions proceed in parallel.
//!
//! Enqueueing is synchronous. The coordinator enqueues in the same poll that
//! observed the CAS commit, so a request dropped after commit still gets its
//! event published; only the acknowledgement is lost.
//!
//! Lanes are bounded. When a lane is full (typically a long broker outage)
//! new events for it are shed and reported as `PublishDegraded` right away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::domain::foundation::{DomainError, ErrorCode, NodeId, SerializableDomainEvent};
use crate::domain::session::{PublishDegraded, StateChangeEvent};
use crate::ports::EventPublisher;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of ordered partition workers.
    pub partitions: u32,

    /// How long a caller waits for delivery before reporting a warning.
    /// Delivery itself continues in the background.
    pub ack_timeout: Duration,

    /// Events queued per partition before new ones are shed.
    pub lane_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            partitions: 16,
            ack_timeout: Duration::from_secs(10),
            lane_capacity: 4096,
        }
    }
}

enum Job {
    Publish {
        event: StateChangeEvent,
        ack: oneshot::Sender<Result<(), DomainError>>,
    },
    Flush(oneshot::Sender<()>),
}

enum Ack {
    Queued(oneshot::Receiver<Result<(), DomainError>>),
    Rejected(&'static str),
}

/// Acknowledgements for events already handed to the workers.
#[must_use = "dropping pending acks discards delivery warnings"]
pub struct PendingAcks {
    pending: Vec<(StateChangeEvent, Ack)>,
    ack_timeout: Duration,
}

impl PendingAcks {
    /// Waits for every event, turning failures into warnings.
    ///
    /// All events share one `ack_timeout` deadline.
    pub async fn warnings(self) -> Vec<PublishDegraded> {
        let deadline = tokio::time::Instant::now() + self.ack_timeout;
        let mut warnings = Vec::new();
        for (event, ack) in self.pending {
            let ack = match ack {
                Ack::Queued(rx) => rx,
                Ack::Rejected(reason) => {
                    warnings.push(PublishDegraded::new(&event, reason));
                    continue;
                }
            };
            match tokio::time::timeout_at(deadline, ack).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warnings.push(PublishDegraded::new(&event, e.to_string())),
                Ok(Err(_)) => {
                    warnings.push(PublishDegraded::new(&event, "dispatcher worker stopped"))
                }
                Err(_) => warnings.push(PublishDegraded::new(
                    &event,
                    format!("delivery still pending after {:?}", self.ack_timeout),
                )),
            }
        }
        warnings
    }
}

/// Partitioned event dispatcher.
pub struct EventDispatcher {
    lanes: Vec<mpsc::Sender<Job>>,
    closed: AtomicBool,
    ack_timeout: Duration,
}

impl EventDispatcher {
    /// Spawns one worker per partition on the current runtime.
    pub fn spawn(
        publisher: Arc<dyn EventPublisher>,
        origin: NodeId,
        config: DispatcherConfig,
    ) -> Self {
        let partitions = config.partitions.max(1);
        let capacity = config.lane_capacity.max(1);
        let lanes = (0..partitions)
            .map(|partition| {
                let (tx, rx) = mpsc::channel(capacity);
                tokio::spawn(run_lane(
                    partition,
                    rx,
                    Arc::clone(&publisher),
                    origin.clone(),
                ));
                tx
            })
            .collect();

        Self {
            lanes,
            closed: AtomicBool::new(false),
            ack_timeout: config.ack_timeout,
        }
    }

    pub fn partitions(&self) -> u32 {
        self.lanes.len() as u32
    }

    /// Hands `events` to their partition workers, in order.
    ///
    /// Never awaits; the events are queued when this returns.
    pub fn enqueue(&self, events: Vec<StateChangeEvent>) -> PendingAcks {
        let closed = self.closed.load(Ordering::SeqCst);
        let pending = events
            .into_iter()
            .map(|event| {
                if closed {
                    tracing::error!(
                        session_id = %event.session_id,
                        version = %event.version,
                        kind = %event.kind,
                        "Event dropped, dispatcher is closed"
                    );
                    return (event, Ack::Rejected("event dispatcher is closed"));
                }
                let (ack, rx) = oneshot::channel();
                let partition = event.partition(self.partitions());
                let job = Job::Publish {
                    event: event.clone(),
                    ack,
                };
                match self.lanes[partition as usize].try_send(job) {
                    Ok(()) => (event, Ack::Queued(rx)),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::error!(
                            partition,
                            session_id = %event.session_id,
                            version = %event.version,
                            kind = %event.kind,
                            "Event dropped, dispatch lane is full"
                        );
                        (event, Ack::Rejected("dispatch lane is full"))
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        (event, Ack::Rejected("dispatcher worker stopped"))
                    }
                }
            })
            .collect();

        PendingAcks {
            pending,
            ack_timeout: self.ack_timeout,
        }
    }

    /// Enqueues and waits for delivery.
    pub async fn dispatch(&self, events: Vec<StateChangeEvent>) -> Vec<PublishDegraded> {
        self.enqueue(events).warnings().await
    }

    /// Stops accepting events and waits until every queued event has been
    /// attempted, or `deadline` passes.
    pub async fn drain(&self, deadline: Duration) -> Result<(), DomainError> {
        self.closed.store(true, Ordering::SeqCst);

        let flushes = self.lanes.iter().map(|lane| async move {
            let (tx, rx) = oneshot::channel();
            if lane.send(Job::Flush(tx)).await.is_ok() {
                let _ = rx.await;
            }
        });

        tokio::time::timeout(deadline, futures::future::join_all(flushes))
            .await
            .map(|_| ())
            .map_err(|_| {
                DomainError::new(
                    ErrorCode::BrokerUnavailable,
                    format!("Event queues not drained within {:?}", deadline),
                )
            })
    }
}

async fn run_lane(
    partition: u32,
    mut jobs: mpsc::Receiver<Job>,
    publisher: Arc<dyn EventPublisher>,
    origin: NodeId,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Publish { event, ack } => {
                let result = match event.to_envelope() {
                    Ok(envelope) => {
                        publisher
                            .publish(envelope.with_origin_node(origin.as_str()))
                            .await
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    tracing::warn!(
                        partition,
                        session_id = %event.session_id,
                        version = %event.version,
                        kind = %event.kind,
                        error = %e,
                        "State change event not delivered"
                    );
                }
                // Receiver is gone if the request was cancelled.
                let _ = ack.send(result);
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!(partition, "Dispatch lane stopped");
}
