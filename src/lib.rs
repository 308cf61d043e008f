//! Session Grid - Distributed session state coordination
//!
//! Versioned session records shared across cluster nodes. Concurrency is
//! controlled by compare-and-swap on an authoritative StateStore, reads are
//! served through a FastCache that is invalidated on every write, and each
//! committed change is published as an event with per-session ordering.

pub mod adapters;
pub mod application;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod ports;
