//! Batch window planning.

use time::{Duration, PrimitiveDateTime};
use tidemark_core::{Interval, TimeWindow};

/// Splits `(watermark, now]` into contiguous windows of at most `max_span`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlanner {
    step: Duration,
    max_span: Duration,
}

impl BatchPlanner {
    /// `interval` is the unit step; a span shorter than one step still yields
    /// one-bar windows.
    pub fn new(interval: Interval, max_span: Duration) -> Self {
        Self {
            step: interval.duration(),
            max_span,
        }
    }

    pub const fn step(&self) -> Duration {
        self.step
    }

    /// Lazily yield the windows after `watermark` up to and including `now`.
    ///
    /// The first window starts one step after the watermark; the last one is
    /// clipped to `now`. Nothing is yielded when `watermark >= now`.
    pub fn plan(&self, watermark: PrimitiveDateTime, now: PrimitiveDateTime) -> BatchWindows {
        let bars_per_window =
            (self.max_span.whole_seconds() / self.step.whole_seconds().max(1)).max(1);
        let extra_bars = i32::try_from(bars_per_window - 1).unwrap_or(i32::MAX);
        BatchWindows {
            next_start: watermark + self.step,
            now,
            step: self.step,
            width: self.step * extra_bars,
        }
    }
}

/// Iterator over planned windows, in increasing order.
#[derive(Debug, Clone)]
pub struct BatchWindows {
    next_start: PrimitiveDateTime,
    now: PrimitiveDateTime,
    step: Duration,
    // Distance from a window's first bar to its last bar.
    width: Duration,
}

impl Iterator for BatchWindows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start > self.now {
            return None;
        }
        let start = self.next_start;
        let end = (start + self.width).min(self.now);
        self.next_start = end + self.step;
        TimeWindow::new(start, end).ok()
    }
}
