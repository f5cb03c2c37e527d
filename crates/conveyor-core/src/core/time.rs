// crates/conveyor-core/src/core/time.rs
// ============================================================================
// Module: Conveyor Time Model
// Description: Canonical timestamp representation for tickets and reports.
// Purpose: Provide deterministic, replayable time values across records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Conveyor embeds explicit unix-millisecond timestamps in tickets, traces,
//! and run reports to keep replay deterministic. The core never reads
//! wall-clock time directly; hosts supply time through the
//! [`crate::interfaces::Clock`] interface.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used in Conveyor tickets and artifacts.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads
///   wall-clock time.
/// - Monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp advanced by the given number of seconds.
    #[must_use]
    pub const fn plus_seconds(self, seconds: i64) -> Self {
        Self(self.0.saturating_add(seconds.saturating_mul(1_000)))
    }

    /// Returns the signed difference `self - other` in milliseconds.
    #[must_use]
    pub const fn millis_since(self, other: Self) -> i64 {
        self.0.saturating_sub(other.0)
    }

    /// Renders the timestamp as an RFC 3339 string.
    ///
    /// Falls back to the raw millisecond value when the timestamp is outside
    /// the representable datetime range.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        let nanos = i128::from(self.0).saturating_mul(1_000_000);
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .ok()
            .and_then(|datetime| datetime.format(&Rfc3339).ok())
            .unwrap_or_else(|| format!("unix_ms:{}", self.0))
    }
}
