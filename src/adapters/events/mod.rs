//! Event bus adapters.
//!
//! Adapters implement the event publishing port
//! for different environments:
//!
//! - `InMemoryEventBus` - In-process bus with fault injection
//! - `RedisStreamPublisher` - One Redis stream per ordered partition
//! - `RabbitStreamPublisher` - One RabbitMQ stream per ordered partition
//! - `RetryingPublisher` - Bounded exponential backoff around any publisher

mod in_memory;
mod rabbitmq_stream;
mod redis_stream;
mod retrying;

pub use in_memory::InMemoryEventBus;
pub use rabbitmq_stream::RabbitStreamPublisher;
pub use redis_stream::RedisStreamPublisher;
pub use retrying::{RetryPolicy, RetryingPublisher};
