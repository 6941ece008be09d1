//! Typed rows for the fact, watermark and audit tables.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, PrimitiveDateTime, Time};

/// One hourly OHLCV fact. Natural key is `(date, hour, source)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Calendar date in the target clock.
    pub date: Date,
    /// Hour of day, 0 through 23.
    pub hour: u8,
    /// Source identifier, e.g. `BTC-USD`.
    pub source: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
}

impl PriceRecord {
    /// The wall-clock instant this row describes, if `hour` is a real hour.
    #[must_use]
    pub fn timestamp(&self) -> Option<PrimitiveDateTime> {
        Time::from_hms(self.hour, 0, 0)
            .ok()
            .map(|time| PrimitiveDateTime::new(self.date, time))
    }
}

/// One news article. Natural key is `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsRecord {
    pub coin_tag: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    /// Publication instant in the target clock.
    pub published_at: PrimitiveDateTime,
    pub news_date: Date,
    pub source_name: Option<String>,
    pub url: String,
}

/// Status recorded on an ingestion log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestStatus {
    Success,
    Warning,
    Failed,
    Skipped,
    Summary,
}

impl IngestStatus {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Summary => "SUMMARY",
        }
    }
}

impl Display for IngestStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(Self::Success),
            "WARNING" => Ok(Self::Warning),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            "SUMMARY" => Ok(Self::Summary),
            other => Err(format!("unknown ingest status '{other}'")),
        }
    }
}

/// Append-only audit entry for one source run, one window, or one whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionLogEntry {
    pub source: String,
    pub status: IngestStatus,
    pub message: String,
    pub rows_inserted: u64,
    pub started_at: PrimitiveDateTime,
    pub finished_at: PrimitiveDateTime,
}

/// A non-blocking data-quality finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssueRecord {
    pub source: String,
    pub issue_type: String,
    pub issue_detail: String,
    pub detected_at: PrimitiveDateTime,
}

/// Stored resume point for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkRecord {
    pub source: String,
    pub last_success: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}
