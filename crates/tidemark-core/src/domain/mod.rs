//! # Domain Types
//!
//! Validated value types shared by providers, the archiver and the engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SourceId`] | Normalized source identifier (`BTC-USD`, `NEWSAPI`) |
//! | [`Interval`] | Bar interval (1m, 5m, 15m, 1h, 1d) |
//! | [`TargetClock`] | Fixed-offset wall clock for stored timestamps |
//! | [`TimeWindow`] | Closed target-clock range processed as one batch |
//! | [`FetchWindow`] | The same range in UTC, for provider calls |

mod clock;
mod interval;
mod source;
mod window;

pub use clock::{floor_to_hour, TargetClock, DEFAULT_OFFSET_HOURS};
pub use interval::Interval;
pub use source::SourceId;
pub use window::{FetchWindow, TimeWindow};
