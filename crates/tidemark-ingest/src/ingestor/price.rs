use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use time::PrimitiveDateTime;
use tidemark_core::{
    ArchiveBatch, Interval, PriceProvider, ProviderBar, SourceError, SourceId, TargetClock,
    TimeWindow,
};
use tidemark_warehouse::{IngestStatus, PriceRecord, QualityIssueRecord};
use tracing::{info, info_span, warn, Instrument};

use super::{
    counted_write, log_entry, Ingestor, RunContext, ScopedSession, SourceOutcome, SourceStatus,
};
use crate::error::IngestError;
use crate::planner::BatchPlanner;
use crate::quality::QualityValidator;
use crate::watermark::WatermarkStore;

const DATASET: &str = "crypto_price";

/// Incremental OHLCV ingestion for one symbol.
///
/// Walks the planned windows in order. For each one: fetch, validate,
/// archive, write, then advance the watermark to the window end, so an
/// interrupted run resumes after the last committed window.
pub struct PriceIngestor {
    source: SourceId,
    provider: Arc<dyn PriceProvider>,
    interval: Interval,
    planner: BatchPlanner,
    watermarks: Arc<WatermarkStore>,
    validator: Arc<QualityValidator>,
}

#[derive(Debug, Default)]
struct Progress {
    rows: u64,
    failed_rows: usize,
    empty_windows: usize,
}

impl PriceIngestor {
    pub fn new(
        source: SourceId,
        provider: Arc<dyn PriceProvider>,
        interval: Interval,
        planner: BatchPlanner,
        watermarks: Arc<WatermarkStore>,
        validator: Arc<QualityValidator>,
    ) -> Self {
        Self {
            source,
            provider,
            interval,
            planner,
            watermarks,
            validator,
        }
    }

    async fn run_logged(&self, context: &RunContext) -> SourceOutcome {
        let timer = Instant::now();
        let started_at = context.clock.now();
        let mut progress = Progress::default();

        let outcome = match self.execute(context, &mut progress).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(
                    source = %self.source,
                    rows = progress.rows,
                    error = %failure,
                    "source run failed"
                );
                let message = format!("{failure} (rows inserted before failure: {})", progress.rows);
                context.log_best_effort(&log_entry(
                    &self.source,
                    IngestStatus::Failed,
                    message.clone(),
                    progress.rows,
                    started_at,
                    context.clock.now(),
                ));
                SourceOutcome::new(self.source.as_str(), SourceStatus::Failed, progress.rows, message)
            }
        };

        let outcome = outcome.with_elapsed(timer.elapsed());
        info!(
            source = %self.source,
            status = %outcome.status,
            rows = outcome.rows,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "source run finished"
        );
        outcome
    }

    async fn execute(
        &self,
        context: &RunContext,
        progress: &mut Progress,
    ) -> Result<SourceOutcome, IngestError> {
        let source = self.source.as_str();
        let session = ScopedSession::open(&context.warehouse)?;

        let watermark = session.with(|s| self.watermarks.get_last_success(s, source))?;
        info!(source, watermark = %watermark, ceiling = %context.ceiling, "watermark read");

        let mut windows = self.planner.plan(watermark, context.ceiling).peekable();
        if windows.peek().is_none() {
            let now = context.clock.now();
            session.with(|s| {
                s.log_ingestion(&log_entry(
                    &self.source,
                    IngestStatus::Skipped,
                    format!("already up to date (watermark {watermark})"),
                    0,
                    now,
                    now,
                ))
            })?;
            info!(source, "source is up to date");
            return Ok(SourceOutcome::new(
                source,
                SourceStatus::Skipped,
                0,
                "already up to date",
            ));
        }

        for window in windows {
            self.process_window(context, &session, window, progress)
                .await?;
        }

        let status = if progress.failed_rows > 0 {
            SourceStatus::Warning
        } else {
            SourceStatus::Success
        };
        let message = format!(
            "rows={} failed_rows={} empty_windows={}",
            progress.rows, progress.failed_rows, progress.empty_windows
        );
        Ok(SourceOutcome::new(source, status, progress.rows, message))
    }

    async fn process_window(
        &self,
        context: &RunContext,
        session: &ScopedSession,
        window: TimeWindow,
        progress: &mut Progress,
    ) -> Result<(), IngestError> {
        let source = self.source.as_str();
        let started_at = context.clock.now();
        info!(source, window_start = %window.start(), window_end = %window.end(), "fetching window");

        let fetch_window = context.clock.to_utc_window(&window);
        let bars = context
            .executor
            .run_if(
                &format!("fetch {source}"),
                || self.provider.fetch(&self.source, fetch_window, self.interval),
                |error: &SourceError| error.retryable(),
            )
            .await?;
        let records = to_price_records(&self.source, context.clock, &window, bars);

        if records.is_empty() {
            warn!(source, window = %window, "provider returned no data for window");
            progress.empty_windows += 1;
            let finished_at = context.clock.now();
            session.with(|s| {
                s.log_ingestion(&log_entry(
                    &self.source,
                    IngestStatus::Warning,
                    format!("no data for window {window}"),
                    0,
                    started_at,
                    finished_at,
                ))?;
                self.watermarks
                    .update_last_success(s, source, window.end(), finished_at)
            })?;
            return Ok(());
        }

        let issues = self.validator.check(&records);
        if !issues.is_empty() {
            warn!(source, issues = issues.len(), "data quality issues detected");
            let detected_at = context.clock.now();
            session.with(|s| {
                issues.iter().try_for_each(|issue| {
                    s.log_quality_issue(&QualityIssueRecord {
                        source: source.to_owned(),
                        issue_type: issue.issue_type.to_owned(),
                        issue_detail: issue.detail.clone(),
                        detected_at,
                    })
                })
            })?;
        }

        let batch = ArchiveBatch::from_records(
            self.provider.name(),
            DATASET,
            source,
            "incremental",
            window.end(),
            &records,
        )?;
        context
            .executor
            .run(&format!("archive {source}"), || context.archiver.archive(&batch))
            .await?;

        let ingested_at = context.clock.now();
        let (inserted, written) = counted_write(
            session,
            |s| s.count_prices(source),
            context.executor.run(&format!("write {source}"), || {
                let result = session.with(|s| {
                    context.writer.insert(s, source, &records, ingested_at)
                });
                std::future::ready(result)
            }),
        )
        .await?;
        progress.rows += inserted;
        let report = written?;
        progress.failed_rows += report.failed;

        let finished_at = context.clock.now();
        session.with(|s| {
            s.log_ingestion(&log_entry(
                &self.source,
                IngestStatus::Success,
                format!(
                    "window {window}: fetched={} inserted={} failed={}",
                    records.len(),
                    inserted,
                    report.failed
                ),
                inserted,
                started_at,
                finished_at,
            ))?;
            self.watermarks
                .update_last_success(s, source, window.end(), finished_at)
        })?;
        info!(
            source,
            window_end = %window.end(),
            rows = inserted,
            "window committed"
        );
        Ok(())
    }
}

impl Ingestor for PriceIngestor {
    fn source(&self) -> &SourceId {
        &self.source
    }

    fn run<'a>(
        &'a self,
        context: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = SourceOutcome> + Send + 'a>> {
        let span = info_span!("ingest_source", source = %self.source);
        Box::pin(self.run_logged(context).instrument(span))
    }
}

/// Convert provider bars to target-clock rows inside `window`, ordered by time.
pub(crate) fn to_price_records(
    source: &SourceId,
    clock: TargetClock,
    window: &TimeWindow,
    bars: Vec<ProviderBar>,
) -> Vec<PriceRecord> {
    let mut stamped = bars
        .into_iter()
        .filter_map(|bar| {
            let local: PrimitiveDateTime = clock.to_local(bar.ts);
            window.contains(local).then_some((local, bar))
        })
        .collect::<Vec<_>>();
    stamped.sort_by_key(|(local, _)| *local);

    stamped
        .into_iter()
        .map(|(local, bar)| PriceRecord {
            date: local.date(),
            hour: local.hour(),
            source: source.as_str().to_owned(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        })
        .collect()
}
