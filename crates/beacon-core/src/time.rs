//! Millisecond-since-epoch timestamps, as they appear on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
///
/// The wire protocol carries raw integers, not ISO-8601 strings, so this
/// type models the wire shape directly rather than wrapping
/// `chrono::DateTime`. Use [`EpochMillis::now`] to stamp new values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochMillis(i64);

impl EpochMillis {
    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    /// Wrap a raw millisecond value.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The raw millisecond value.
    #[must_use]
    pub fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EpochMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_positive_and_plausible() {
        let t = EpochMillis::now();
        // Sanity bound: some time after 2020-01-01.
        assert!(t.as_millis() > 1_577_836_800_000);
    }

    #[test]
    fn serde_round_trip() {
        let t = EpochMillis::from_millis(42);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "42");
        let back: EpochMillis = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
