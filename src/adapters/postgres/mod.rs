//! PostgreSQL adapters - Database implementations for storage ports.
//!
//! - `PostgresStateStore` - Versioned session rows with guarded writes and a
//!   LISTEN/NOTIFY change feed

mod session_store;

pub use session_store::{PostgresStateStore, CHANGE_CHANNEL};
