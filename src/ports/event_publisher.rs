//! EventPublisher port - Interface for publishing state-change events.
//!
//! This port defines how the coordinator publishes events without knowing
//! about the underlying transport (in-memory bus, Redis Streams, ...).

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, EventEnvelope};

/// Port for publishing state-change events.
///
/// Implementations must ensure:
/// - Delivery is at-least-once (consumers deduplicate by `event_id`)
/// - A returned `Ok` means the broker accepted the event
/// - Transient broker faults are reported with a transient [`ErrorCode`]
///   so the retry decorator can tell them apart from permanent ones
///
/// Ordering across calls is the caller's responsibility; the dispatcher
/// serializes publishes per session partition.
///
/// [`ErrorCode`]: crate::domain::foundation::ErrorCode
///
/// # Example
///
/// ```ignore
/// let envelope = event.to_envelope()?;
/// publisher.publish(envelope).await?;
/// ```
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError>;

    /// Check broker connectivity. Transports without a probe report healthy.
    async fn ping(&self) -> Result<(), DomainError> {
        Ok(())
    }
}
