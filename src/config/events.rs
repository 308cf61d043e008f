//! EventBus delivery configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::events::RetryPolicy;
use crate::application::DispatcherConfig;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventsBackend {
    /// In-process bus; consumers must live in the same process
    #[default]
    Memory,
    /// Redis Streams, one stream per partition
    Redis,
    /// RabbitMQ streams, one stream per partition
    RabbitMq,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub backend: EventsBackend,

    /// Publish attempts per event, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Deadline for a single publish attempt
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Ordered delivery lanes; events of one session always share a lane
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    #[serde(default = "default_stream_prefix")]
    pub stream_prefix: String,

    /// Approximate cap on entries kept per Redis stream
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: u64,

    /// Events queued per partition before new ones are shed
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,
}

impl EventsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempt_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }

    /// Callers wait for the whole retry budget before a delivery is
    /// reported as degraded.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            partitions: self.partitions,
            ack_timeout: self.retry_policy().worst_case(),
            lane_capacity: self.lane_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 || self.max_attempts > 20 {
            return Err(ValidationError::InvalidRetryPolicy("events.max_attempts"));
        }
        if self.base_delay_ms == 0 || self.base_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidRetryPolicy("events.base_delay_ms"));
        }
        if self.publish_timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout("events.publish_timeout_ms"));
        }
        if self.partitions == 0 || self.partitions > 1024 {
            return Err(ValidationError::InvalidPartitions);
        }
        if self.stream_prefix.trim().is_empty() {
            return Err(ValidationError::InvalidPrefix("events.stream_prefix"));
        }
        if self.lane_capacity == 0 {
            return Err(ValidationError::InvalidLimit("events.lane_capacity"));
        }
        Ok(())
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            backend: EventsBackend::default(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            partitions: default_partitions(),
            stream_prefix: default_stream_prefix(),
            stream_max_len: default_stream_max_len(),
            lane_capacity: default_lane_capacity(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_publish_timeout_ms() -> u64 {
    1_000
}

fn default_partitions() -> u32 {
    16
}

fn default_stream_prefix() -> String {
    "session-grid:events".to_string()
}

fn default_stream_max_len() -> u64 {
    100_000
}

fn default_lane_capacity() -> usize {
    4_096
}
