//! RetryingPublisher - Bounded exponential backoff around any publisher.
//!
//! Each attempt runs under its own timeout. Transient failures and timeouts
//! are retried until `max_attempts` is spent; permanent failures (bad
//! serialization, rejected payloads) return immediately.
//!
//! ## Schedule
//!
//! | Attempt | Delay before it |
//! |---------|-----------------|
//! | 1 | none |
//! | n > 1 | `min(max_delay, base_delay * 2^(n-2))` |

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{DomainError, ErrorCode, EventEnvelope};
use crate::ports::EventPublisher;

/// Backoff parameters for event delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on a single broker round trip.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `failed_attempts` consecutive failures.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Worst-case time spent delivering one event.
    pub fn worst_case(&self) -> Duration {
        let waits: Duration = (1..self.max_attempts.max(1))
            .map(|n| self.delay_after(n))
            .sum();
        waits + self.attempt_timeout * self.max_attempts.max(1)
    }
}

/// Decorator that retries the wrapped publisher.
pub struct RetryingPublisher {
    inner: Arc<dyn EventPublisher>,
    policy: RetryPolicy,
}

impl RetryingPublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(&self, event: &EventEnvelope) -> Result<(), DomainError> {
        match tokio::time::timeout(self.policy.attempt_timeout, self.inner.publish(event.clone()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DomainError::new(
                ErrorCode::BrokerUnavailable,
                format!("Publish timed out after {:?}", self.policy.attempt_timeout),
            )),
        }
    }
}

#[async_trait]
impl EventPublisher for RetryingPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(&event).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(
                            event_id = %event.event_id,
                            attempt,
                            "Event published after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) if !e.is_transient() => {
                    tracing::error!(
                        event_id = %event.event_id,
                        error = %e,
                        "Event publish failed permanently"
                    );
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        attempts = attempt,
                        error = %e,
                        "Event publish retries exhausted"
                    );
                    return Err(e.with_detail("attempts", attempt.to_string()));
                }
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::debug!(
                        event_id = %event.event_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Event publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), DomainError> {
        match tokio::time::timeout(self.policy.attempt_timeout, self.inner.ping()).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::new(
                ErrorCode::BrokerUnavailable,
                format!("Broker ping timed out after {:?}", self.policy.attempt_timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryEventBus;
    use crate::domain::foundation::{SerializableDomainEvent, SessionKey, Timestamp};
    use crate::domain::session::{StateChangeEvent, StateChangeKind, Version};

    fn envelope() -> EventEnvelope {
        StateChangeEvent::new(
            SessionKey::new("s1").unwrap(),
            Version::INITIAL,
            StateChangeKind::Created,
            Timestamp::now(),
        )
        .to_envelope()
        .unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            attempt_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn delays_double_then_cap() {
        let policy = fast_policy();
        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after(3), Duration::from_millis(40));
        assert_eq!(policy.delay_after(4), Duration::from_millis(40));
        assert_eq!(policy.delay_after(60), Duration::from_millis(40));
    }

    #[test]
    fn worst_case_sums_waits_and_timeouts() {
        let policy = fast_policy();
        // waits 10 + 20 + 40 + 40, five 100ms attempts
        assert_eq!(policy.worst_case(), Duration::from_millis(610));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_transient_failures() {
        let bus = Arc::new(InMemoryEventBus::new());
        bus.fail_next(3);
        let publisher = RetryingPublisher::new(bus.clone(), fast_policy());

        publisher.publish(envelope()).await.unwrap();

        assert_eq!(bus.attempt_count(), 4);
        assert_eq!(bus.event_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let bus = Arc::new(InMemoryEventBus::new());
        bus.set_unavailable(true);
        let publisher = RetryingPublisher::new(bus.clone(), fast_policy());

        let err = publisher.publish(envelope()).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::BrokerUnavailable);
        assert_eq!(err.details.get("attempts").map(String::as_str), Some("5"));
        assert_eq!(bus.attempt_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        struct Rejecting;

        #[async_trait]
        impl EventPublisher for Rejecting {
            async fn publish(&self, _event: EventEnvelope) -> Result<(), DomainError> {
                Err(DomainError::new(ErrorCode::SerializationError, "bad payload"))
            }
        }

        let publisher = RetryingPublisher::new(Arc::new(Rejecting), fast_policy());
        let err = publisher.publish(envelope()).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::SerializationError);
        assert!(err.details.get("attempts").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_broker_times_out_each_attempt() {
        struct Hanging;

        #[async_trait]
        impl EventPublisher for Hanging {
            async fn publish(&self, _event: EventEnvelope) -> Result<(), DomainError> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let publisher = RetryingPublisher::new(Arc::new(Hanging), fast_policy());
        let started = tokio::time::Instant::now();

        let err = publisher.publish(envelope()).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(started.elapsed(), fast_policy().worst_case());
    }
}
