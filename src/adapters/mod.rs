//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the coordinator to external systems:
//! - `storage` / `postgres` - StateStore (in-memory, PostgreSQL)
//! - `cache` - FastCache (in-memory, Redis)
//! - `events` - Event bus (in-memory, Redis Streams) and retry decorator
//! - `clock` - Wall clock and a manual test clock
//! - `http` - REST gateway

pub mod cache;
pub mod clock;
pub mod events;
pub mod http;
pub mod postgres;
pub mod storage;

pub use clock::{ManualClock, SystemClock};
pub use events::{InMemoryEventBus, RetryPolicy, RetryingPublisher};
