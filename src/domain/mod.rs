//! Domain layer containing the session model and its vocabulary.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors, event envelope)
//! - `session` - Versioned session records, state-change events, coordinator errors

pub mod foundation;
pub mod session;
