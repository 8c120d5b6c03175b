//! Half-open ingestion-time windows used to scope resolution passes

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// `[start, end)` over `received_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of length `interval` whose exclusive upper bound is `end`.
    ///
    /// `None` when the start would fall before the earliest representable time.
    pub fn ending_at(end: DateTime<Utc>, interval: Duration) -> Option<Self> {
        let start = end.checked_sub_signed(interval)?;
        Some(Self { start, end })
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts < self.end
    }
}
