//! Clock port - Source of "now" for expiry decisions.
//!
//! Expiry is evaluated against the clock of whichever node performs the
//! read or sweep, so the clock is injected rather than read ambiently.

use crate::domain::foundation::Timestamp;

/// Port for reading wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn Clock) {}
}
