use serde::{Deserialize, Serialize};
use time::macros::offset;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::window::{FetchWindow, TimeWindow};
use crate::ValidationError;

/// Offset used when none is configured; matches `TargetClock::default()`.
pub const DEFAULT_OFFSET_HOURS: i8 = 7;

/// Fixed-offset wall clock in which every watermark and price timestamp is
/// expressed.
///
/// Values in the target clock are naive [`PrimitiveDateTime`]s; conversion to
/// and from UTC happens only at the provider boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetClock {
    offset: UtcOffset,
}

impl TargetClock {
    /// Build a clock `hours` away from UTC.
    pub fn from_hours(hours: i8) -> Result<Self, ValidationError> {
        UtcOffset::from_hms(hours, 0, 0)
            .map(|offset| Self { offset })
            .map_err(|_| ValidationError::InvalidUtcOffset { hours })
    }

    pub const fn utc() -> Self {
        Self {
            offset: UtcOffset::UTC,
        }
    }

    pub const fn offset(self) -> UtcOffset {
        self.offset
    }

    /// Wall-clock reading of `instant` in this clock.
    pub fn to_local(self, instant: OffsetDateTime) -> PrimitiveDateTime {
        let local = instant.to_offset(self.offset);
        PrimitiveDateTime::new(local.date(), local.time())
    }

    /// The UTC instant a wall-clock reading of this clock refers to.
    pub fn to_utc(self, local: PrimitiveDateTime) -> OffsetDateTime {
        local.assume_offset(self.offset).to_offset(UtcOffset::UTC)
    }

    /// UTC bounds of a target-clock window.
    pub fn to_utc_window(self, window: &TimeWindow) -> FetchWindow {
        FetchWindow {
            start: self.to_utc(window.start()),
            end: self.to_utc(window.end()),
        }
    }

    /// Backfill ceiling for a run started at `instant`: the instant floored to
    /// the hour, read in this clock.
    pub fn run_ceiling(self, instant: OffsetDateTime) -> PrimitiveDateTime {
        floor_to_hour(self.to_local(instant))
    }

    /// Backfill ceiling for a run starting now.
    pub fn current_run_ceiling(self) -> PrimitiveDateTime {
        self.run_ceiling(OffsetDateTime::now_utc())
    }

    /// Current wall-clock time, used for audit columns.
    pub fn now(self) -> PrimitiveDateTime {
        self.to_local(OffsetDateTime::now_utc())
    }
}

impl Default for TargetClock {
    fn default() -> Self {
        Self {
            offset: offset!(+7),
        }
    }
}

/// Drop minutes, seconds and sub-seconds.
pub fn floor_to_hour(value: PrimitiveDateTime) -> PrimitiveDateTime {
    let time = value.time();
    let seconds = i64::from(time.minute()) * 60 + i64::from(time.second());
    let nanos = i32::try_from(time.nanosecond()).unwrap_or(0);
    value - Duration::new(seconds, nanos)
}
