use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use crate::ValidationError;

/// Closed time range `[start, end]` in the target clock.
///
/// Both bounds are bar timestamps, so a one-hour window on an hourly interval
/// has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    start: PrimitiveDateTime,
    end: PrimitiveDateTime,
}

impl TimeWindow {
    pub fn new(start: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> PrimitiveDateTime {
        self.start
    }

    pub const fn end(&self) -> PrimitiveDateTime {
        self.end
    }

    pub fn contains(&self, value: PrimitiveDateTime) -> bool {
        self.start <= value && value <= self.end
    }

    /// Distance between the first and last bar timestamp.
    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {}]", self.start, self.end)
    }
}

/// UTC bounds of a [`TimeWindow`], as handed to providers. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn window_bounds_are_inclusive() {
        let window =
            TimeWindow::new(datetime!(2024-01-01 01:00), datetime!(2024-01-01 06:00)).expect("window");
        assert!(window.contains(datetime!(2024-01-01 01:00)));
        assert!(window.contains(datetime!(2024-01-01 06:00)));
        assert!(!window.contains(datetime!(2024-01-01 07:00)));
        assert_eq!(window.span(), Duration::hours(5));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let err = TimeWindow::new(datetime!(2024-01-02 00:00), datetime!(2024-01-01 00:00))
            .expect_err("must fail");
        assert!(matches!(err, ValidationError::InvertedWindow { .. }));
    }
}
