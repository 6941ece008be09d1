//! One-shot historical price load.
//!
//! Separate from the recurring engine: rows go through the staging table in
//! one statement per chunk and watermarks are never read or moved.

use std::sync::Arc;

use time::{Date, Duration, PrimitiveDateTime, Time};
use tidemark_core::{ArchiveBatch, Interval, PriceProvider, SourceError, SourceId, ValidationError};
use tracing::{info, info_span, warn, Instrument};

use crate::error::IngestError;
use crate::ingestor::{to_price_records, RunContext};
use crate::planner::BatchPlanner;

const DATASET: &str = "crypto_price";
const DEFAULT_CHUNK_DAYS: i64 = 7;

/// Rows fetched and moved for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkLoadReport {
    pub fetched: u64,
    pub loaded: u64,
    pub chunks: usize,
}

pub struct BulkLoader {
    provider: Arc<dyn PriceProvider>,
    interval: Interval,
    chunk: Duration,
    archive: bool,
}

impl BulkLoader {
    pub fn new(provider: Arc<dyn PriceProvider>, interval: Interval) -> Self {
        Self {
            provider,
            interval,
            chunk: Duration::days(DEFAULT_CHUNK_DAYS),
            archive: true,
        }
    }

    pub fn with_chunk(mut self, chunk: Duration) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn with_archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    /// Load every bar of `source` from `start` 00:00 through the last bar of
    /// `end`, never past the run ceiling.
    pub async fn load(
        &self,
        context: &RunContext,
        source: &SourceId,
        start: Date,
        end: Date,
    ) -> Result<BulkLoadReport, IngestError> {
        if start > end {
            return Err(ValidationError::InvertedWindow {
                start: start.to_string(),
                end: end.to_string(),
            }
            .into());
        }

        let span = info_span!("bulk_load", source = %source);
        self.load_range(context, source, start, end).instrument(span).await
    }

    async fn load_range(
        &self,
        context: &RunContext,
        source: &SourceId,
        start: Date,
        end: Date,
    ) -> Result<BulkLoadReport, IngestError> {
        let planner = BatchPlanner::new(self.interval, self.chunk);
        let step = planner.step();
        let first = PrimitiveDateTime::new(start, Time::MIDNIGHT);
        let last = PrimitiveDateTime::new(end, Time::MIDNIGHT) + Duration::DAY - step;
        let last = last.min(context.ceiling);

        let mut report = BulkLoadReport::default();
        for window in planner.plan(first - step, last) {
            report.chunks += 1;
            let fetch_window = context.clock.to_utc_window(&window);
            let bars = context
                .executor
                .run_if(
                    &format!("bulk fetch {source}"),
                    || self.provider.fetch(source, fetch_window, self.interval),
                    |error: &SourceError| error.retryable(),
                )
                .await?;
            let records = to_price_records(source, context.clock, &window, bars);
            if records.is_empty() {
                warn!(source = %source, window = %window, "no data for bulk window");
                continue;
            }

            if self.archive {
                let batch = ArchiveBatch::from_records(
                    self.provider.name(),
                    DATASET,
                    source.as_str(),
                    "bulk",
                    window.end(),
                    &records,
                )?;
                context
                    .executor
                    .run(&format!("archive {source}"), || context.archiver.archive(&batch))
                    .await?;
            }

            let loaded = context
                .warehouse
                .bulk_load_prices(&records, context.clock.now())?;
            report.fetched += records.len() as u64;
            report.loaded += loaded;
            info!(
                source = %source,
                window = %window,
                fetched = records.len(),
                loaded,
                "bulk window loaded"
            );
        }
        Ok(report)
    }
}
