//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Time left between `now` and this timestamp, zero if already passed.
    pub fn remaining_from(&self, now: &Timestamp) -> std::time::Duration {
        self.duration_since(now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    /// Creates a new timestamp offset by a std duration, saturating at the
    /// maximum representable instant.
    pub fn plus(&self, offset: std::time::Duration) -> Self {
        let millis = i64::try_from(offset.as_millis()).unwrap_or(i64::MAX);
        let shifted = Duration::try_milliseconds(millis)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self(shifted)
    }

    /// Creates a timestamp from Unix milliseconds.
    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Returns the timestamp as Unix milliseconds.
    pub fn as_unix_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use std::time::Duration as StdDuration;

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn timestamp_ordering_helpers_agree() {
        let ts1 = Timestamp::from_unix_millis(1_000).unwrap();
        let ts2 = Timestamp::from_unix_millis(2_000).unwrap();

        assert!(ts1.is_before(&ts2));
        assert!(ts2.is_after(&ts1));
        assert!(ts1 < ts2);
    }

    #[test]
    fn timestamp_deserializes_from_json() {
        let json = "\"2024-01-15T10:30:00Z\"";
        let ts: Timestamp = serde_json::from_str(json).unwrap();

        assert_eq!(ts.as_datetime().year(), 2024);
    }

    #[test]
    fn plus_adds_std_duration() {
        let ts = Timestamp::from_unix_millis(10_000).unwrap();
        let later = ts.plus(StdDuration::from_millis(1_500));
        assert_eq!(later.as_unix_millis(), 11_500);
    }

    #[test]
    fn plus_saturates_instead_of_overflowing() {
        let ts = Timestamp::now();
        let far = ts.plus(StdDuration::from_secs(u64::MAX));
        assert!(far.is_after(&ts));
    }

    #[test]
    fn remaining_from_is_zero_once_passed() {
        let deadline = Timestamp::from_unix_millis(5_000).unwrap();
        let before = Timestamp::from_unix_millis(4_000).unwrap();
        let after = Timestamp::from_unix_millis(6_000).unwrap();

        assert_eq!(deadline.remaining_from(&before), StdDuration::from_secs(1));
        assert_eq!(deadline.remaining_from(&after), StdDuration::ZERO);
    }
}
