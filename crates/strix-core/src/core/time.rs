// crates/strix-core/src/core/time.rs
// ============================================================================
// Module: Strix Timestamps
// Description: Epoch timestamps shared by events, scan rows, and snapshots.
// Purpose: Provide a single serializable time representation for the engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Timestamps are seconds since the Unix epoch carried as `f64` so event
//! generation times keep sub-second resolution while scan lifecycle fields
//! round-trip cleanly through integer storage columns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Seconds since the Unix epoch.
///
/// # Invariants
/// - Always finite and non-negative.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(elapsed.as_secs_f64())
    }

    /// Builds a timestamp from raw epoch seconds, clamping invalid input to zero.
    #[must_use]
    pub fn from_epoch_secs(secs: f64) -> Self {
        if secs.is_finite() && secs >= 0.0 {
            Self(secs)
        } else {
            Self(0.0)
        }
    }

    /// Returns the timestamp as fractional epoch seconds.
    #[must_use]
    pub const fn as_secs_f64(self) -> f64 {
        self.0
    }

    /// Returns the timestamp truncated to whole epoch seconds.
    #[must_use]
    pub fn as_epoch_secs(self) -> i64 {
        // Timestamps are bounded well below i64::MAX seconds.
        let truncated = self.0.trunc();
        if truncated >= 0.0 && truncated <= 9_007_199_254_740_992.0 {
            #[allow(
                clippy::cast_possible_truncation,
                reason = "Range-checked above; fractional part already truncated."
            )]
            let whole = truncated as i64;
            whole
        } else {
            0
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_positive() {
        assert!(Timestamp::now().as_secs_f64() > 0.0);
    }

    #[test]
    fn from_epoch_rejects_nan() {
        assert!((Timestamp::from_epoch_secs(f64::NAN).as_secs_f64() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn whole_seconds_truncate() {
        let ts = Timestamp::from_epoch_secs(1234.987);
        assert_eq!(ts.as_epoch_secs(), 1234);
    }
}
