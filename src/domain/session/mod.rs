//! Session domain module.
//!
//! Versioned session records, the state-change events emitted for them,
//! and the coordinator's error taxonomy.
//!
//! # Events
//!
//! - `Created` - first successful write for a key
//! - `Updated` - payload replaced or expiry extended
//! - `Expired` - lifetime elapsed and the record was evicted
//! - `Deleted` - record removed by a caller

mod aggregate;
mod errors;
mod events;

pub use aggregate::{SessionRecord, Version};
pub use errors::{Committed, CoordinatorError, PublishDegraded};
pub use events::{partition_for, StateChangeEvent, StateChangeKind};
