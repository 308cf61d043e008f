//! RabbitMQ Streams event publisher.
//!
//! Mirrors the Redis layout: each ordered partition is one stream
//! (`{prefix}:{partition}`) with its own producer, so every event of a
//! session lands in the same stream in commit order. Streams are created on
//! connect with a byte retention cap; an existing stream is reused as is.

use async_trait::async_trait;
use rabbitmq_stream_client::error::{ProducerPublishError, StreamCreateError};
use rabbitmq_stream_client::types::{ByteCapacity, Message, ResponseCode};
use rabbitmq_stream_client::{Environment, NoDedup, Producer};

use crate::domain::foundation::{DomainError, ErrorCode, EventEnvelope};
use crate::domain::session::partition_for;
use crate::ports::EventPublisher;

/// Publishes envelopes as JSON message bodies, one producer per partition.
pub struct RabbitStreamPublisher {
    environment: Environment,
    producers: Vec<Producer<NoDedup>>,
    stream_prefix: String,
    max_stream_bytes: u64,
}

impl RabbitStreamPublisher {
    /// Creates (or reuses) every partition stream and opens its producer.
    pub async fn connect(
        environment: Environment,
        stream_prefix: impl Into<String>,
        partitions: u32,
        max_stream_bytes: u64,
    ) -> Result<Self, DomainError> {
        let stream_prefix = stream_prefix.into();
        let mut producers = Vec::with_capacity(partitions.max(1) as usize);

        for partition in 0..partitions.max(1) {
            let stream = stream_name(&stream_prefix, partition);
            ensure_stream(&environment, &stream, max_stream_bytes).await?;
            let producer = environment.producer().build(&stream).await.map_err(|e| {
                DomainError::new(
                    ErrorCode::BrokerUnavailable,
                    format!("Opening producer on {} failed: {}", stream, e),
                )
            })?;
            producers.push(producer);
        }

        tracing::debug!(
            prefix = %stream_prefix,
            partitions = producers.len(),
            "RabbitMQ stream producers ready"
        );
        Ok(Self {
            environment,
            producers,
            stream_prefix,
            max_stream_bytes,
        })
    }

    /// Stream that receives events for `aggregate_id`.
    pub fn stream_for(&self, aggregate_id: &str) -> String {
        stream_name(&self.stream_prefix, self.partition_of(aggregate_id))
    }

    fn partition_of(&self, aggregate_id: &str) -> u32 {
        partition_for(aggregate_id, self.producers.len() as u32)
    }
}

fn stream_name(prefix: &str, partition: u32) -> String {
    format!("{}:{}", prefix, partition)
}

async fn ensure_stream(
    environment: &Environment,
    stream: &str,
    max_bytes: u64,
) -> Result<(), DomainError> {
    let result = environment
        .stream_creator()
        .max_length(ByteCapacity::B(max_bytes))
        .create(stream)
        .await;
    stream_created(result)
}

fn stream_created(result: Result<(), StreamCreateError>) -> Result<(), DomainError> {
    match result {
        Ok(())
        | Err(StreamCreateError::Create {
            status: ResponseCode::StreamAlreadyExists,
            ..
        }) => Ok(()),
        // The broker answered and said no; retrying will not change that.
        Err(StreamCreateError::Create { stream, status }) => Err(DomainError::new(
            ErrorCode::InternalError,
            format!("Creating stream {} was refused: {:?}", stream, status),
        )),
        Err(e) => Err(DomainError::new(
            ErrorCode::BrokerUnavailable,
            format!("Creating stream failed: {}", e),
        )),
    }
}

fn rabbit_error(e: ProducerPublishError) -> DomainError {
    let code = match e {
        ProducerPublishError::Timeout
        | ProducerPublishError::Closed
        | ProducerPublishError::Client(_) => ErrorCode::BrokerUnavailable,
        _ => ErrorCode::InternalError,
    };
    DomainError::new(code, format!("RabbitMQ publish failed: {}", e))
}

#[async_trait]
impl EventPublisher for RabbitStreamPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError> {
        let body = serde_json::to_vec(&event).map_err(|e| {
            DomainError::new(
                ErrorCode::SerializationError,
                format!("Failed to serialize envelope {}: {}", event.event_id, e),
            )
        })?;
        let partition = self.partition_of(&event.aggregate_id);
        let producer = self.producers.get(partition as usize).ok_or_else(|| {
            DomainError::new(
                ErrorCode::InternalError,
                format!("No producer for partition {}", partition),
            )
        })?;

        let status = producer
            .send_with_confirm(Message::builder().body(body).build())
            .await
            .map_err(rabbit_error)?;
        if !status.confirmed() {
            return Err(DomainError::new(
                ErrorCode::BrokerUnavailable,
                format!(
                    "Broker did not confirm event {} on {}",
                    event.event_id,
                    stream_name(&self.stream_prefix, partition)
                ),
            ));
        }

        tracing::trace!(
            partition,
            publishing_id = status.publishing_id(),
            event_id = %event.event_id,
            "Event appended to stream"
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), DomainError> {
        let stream = stream_name(&self.stream_prefix, 0);
        ensure_stream(&self.environment, &stream, self.max_stream_bytes).await
    }
}
