//! Redis Streams event publisher.
//!
//! Each ordered partition maps to one stream (`{prefix}:{partition}`), so
//! all events of a session are appended to the same stream in commit order.
//! Streams are capped with approximate `MAXLEN` trimming.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::domain::foundation::{DomainError, ErrorCode, EventEnvelope};
use crate::domain::session::partition_for;
use crate::ports::EventPublisher;

/// Publishes envelopes with `XADD`.
///
/// Stream entry fields:
/// - `event_id`, `event_type`, `aggregate_id`, `occurred_at`
/// - `envelope` - the full JSON envelope
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: MultiplexedConnection,
    stream_prefix: String,
    partitions: u32,
    max_len: u64,
}

impl RedisStreamPublisher {
    pub fn new(
        conn: MultiplexedConnection,
        stream_prefix: impl Into<String>,
        partitions: u32,
        max_len: u64,
    ) -> Self {
        Self {
            conn,
            stream_prefix: stream_prefix.into(),
            partitions: partitions.max(1),
            max_len,
        }
    }

    /// Stream that receives events for `aggregate_id`.
    pub fn stream_for(&self, aggregate_id: &str) -> String {
        stream_name(&self.stream_prefix, partition_for(aggregate_id, self.partitions))
    }
}

fn stream_name(prefix: &str, partition: u32) -> String {
    format!("{}:{}", prefix, partition)
}

fn broker_error(e: redis::RedisError) -> DomainError {
    // Protocol-level rejections will not go away on retry.
    let code = match e.kind() {
        redis::ErrorKind::ResponseError | redis::ErrorKind::TypeError => ErrorCode::InternalError,
        _ => ErrorCode::BrokerUnavailable,
    };
    DomainError::new(code, format!("Redis XADD failed: {}", e))
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError> {
        let body = serde_json::to_string(&event).map_err(|e| {
            DomainError::new(
                ErrorCode::SerializationError,
                format!("Failed to serialize envelope {}: {}", event.event_id, e),
            )
        })?;
        let stream = self.stream_for(&event.aggregate_id);

        let mut conn = self.conn.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("event_id")
            .arg(event.event_id.as_str())
            .arg("event_type")
            .arg(&event.event_type)
            .arg("aggregate_id")
            .arg(&event.aggregate_id)
            .arg("occurred_at")
            .arg(event.occurred_at.as_unix_millis())
            .arg("envelope")
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(broker_error)?;

        tracing::trace!(
            stream = %stream,
            entry_id = %entry_id,
            event_id = %event.event_id,
            "Event appended to stream"
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), DomainError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(broker_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_joins_prefix_and_partition() {
        assert_eq!(stream_name("grid:events", 3), "grid:events:3");
    }

    #[test]
    fn same_session_always_maps_to_same_stream() {
        let partition = partition_for("session-7", 8);
        assert_eq!(
            stream_name("grid:events", partition),
            stream_name("grid:events", partition_for("session-7", 8))
        );
    }

    #[test]
    fn io_errors_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = broker_error(redis::RedisError::from(io));
        assert!(err.is_transient());
    }

    #[test]
    fn response_errors_are_permanent() {
        let err = broker_error(redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "WRONGTYPE",
        )));
        assert!(!err.is_transient());
    }
}
