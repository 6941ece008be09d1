use thiserror::Error;

/// Validation errors raised while building domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("source identifier cannot be empty")]
    EmptySource,
    #[error("source identifier length {len} exceeds max {max}")]
    SourceTooLong { len: usize, max: usize },
    #[error("source identifier contains invalid character '{ch}' at index {index}")]
    SourceInvalidChar { ch: char, index: usize },

    #[error("invalid interval '{value}', expected one of 1m, 5m, 15m, 1h, 1d")]
    InvalidInterval { value: String },

    #[error("utc offset {hours}h is outside -23..=23")]
    InvalidUtcOffset { hours: i8 },
    #[error("window start {start} is after end {end}")]
    InvertedWindow { start: String, end: String },
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
