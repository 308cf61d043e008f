//! Application layer - Session coordination and background services.
//!
//! - `SessionCoordinator` - Create/get/update/delete/touch over the ports
//! - `EventDispatcher` - Per-session ordered, cancellation-safe event delivery
//! - `ExpirySweeper` - Evicts expired sessions and announces the expiry
//! - `HealthService` - Backend readiness probes

mod coordinator;
mod event_dispatch;
mod health;
mod sweeper;

pub use coordinator::{CoordinatorSettings, SessionCoordinator};
pub use event_dispatch::{DispatcherConfig, EventDispatcher, PendingAcks};
pub use health::{ComponentStatus, HealthService, ReadinessReport};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig};
