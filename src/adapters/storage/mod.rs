//! Storage Adapters
//!
//! In-process implementation of the StateStore port. The PostgreSQL
//! implementation lives in `adapters::postgres`.
//!
//! ## Usage
//!
//! ```ignore
//! use adapters::storage::InMemoryStateStore;
//!
//! let store = Arc::new(InMemoryStateStore::new());
//! store.set_unavailable(true); // simulate an outage in tests
//! ```

mod in_memory;

pub use in_memory::InMemoryStateStore;
