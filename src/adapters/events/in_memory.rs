//! In-memory event bus.
//!
//! Records everything accepted, which makes it the bus of choice for tests
//! and single-node development. Broker faults can be injected to exercise
//! the retry path.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::foundation::{DomainError, ErrorCode, EventEnvelope};
use crate::ports::EventPublisher;

/// In-memory event bus.
///
/// Features:
/// - Capture of every accepted event for assertions
/// - Fault injection: fail the next N publishes, or reject all publishes
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(InMemoryEventBus::new());
/// bus.fail_next(2);
/// publisher.publish(envelope).await?; // first two attempts fail
/// assert!(bus.has_event("session.created.v1"));
/// ```
pub struct InMemoryEventBus {
    published: RwLock<Vec<EventEnvelope>>,
    failures_remaining: AtomicU32,
    unavailable: AtomicBool,
    attempts: AtomicU32,
}

impl InMemoryEventBus {
    /// Creates a new empty event bus.
    pub fn new() -> Self {
        Self {
            published: RwLock::new(Vec::new()),
            failures_remaining: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    // Poisoning only happens if a holder panicked mid-push; the Vec is
    // still structurally valid, so keep serving.
    fn read_published(&self) -> RwLockReadGuard<'_, Vec<EventEnvelope>> {
        self.published.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_published(&self) -> RwLockWriteGuard<'_, Vec<EventEnvelope>> {
        self.published.write().unwrap_or_else(|e| e.into_inner())
    }

    // === Fault Injection ===

    /// Makes the next `count` publish attempts fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Rejects every publish while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Publish attempts seen so far, including rejected ones.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    // === Inspection ===

    /// Returns all accepted events in acceptance order.
    pub fn published_events(&self) -> Vec<EventEnvelope> {
        self.read_published().clone()
    }

    /// Returns events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.read_published()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Returns events for a specific session, in acceptance order.
    pub fn events_for_aggregate(&self, aggregate_id: &str) -> Vec<EventEnvelope> {
        self.read_published()
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.read_published().len()
    }

    /// Checks if a specific event type was accepted.
    pub fn has_event(&self, event_type: &str) -> bool {
        self.read_published()
            .iter()
            .any(|e| e.event_type == event_type)
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::new(
                ErrorCode::BrokerUnavailable,
                "In-memory bus is unavailable",
            ));
        }
        if self.take_injected_failure() {
            return Err(DomainError::new(
                ErrorCode::BrokerUnavailable,
                "Injected publish failure",
            ));
        }

        tracing::trace!(
            event_type = %event.event_type,
            session_id = %event.aggregate_id,
            "Event accepted"
        );
        self.write_published().push(event);
        Ok(())
    }

    async fn ping(&self) -> Result<(), DomainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::new(
                ErrorCode::BrokerUnavailable,
                "In-memory bus is unavailable",
            ));
        }
        Ok(())
    }
}
