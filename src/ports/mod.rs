//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the coordinator and the outside world. Adapters implement these ports.
//!
//! ## Storage Ports
//!
//! - `StateStore` - Authoritative versioned store with conditional writes
//! - `FastCache` - Ephemeral read-through cache, never authoritative
//!
//! ## Event Ports
//!
//! - `EventPublisher` - Port for publishing state-change events
//!
//! ## Time
//!
//! - `Clock` - Injected wall clock for expiry decisions

mod clock;
mod event_publisher;
mod fast_cache;
mod state_store;

pub use clock::Clock;
pub use event_publisher::EventPublisher;
pub use fast_cache::{CacheError, FastCache, NoopCache};
pub use state_store::{CasOutcome, InsertOutcome, StateStore, StateStoreError, StoreChange};
