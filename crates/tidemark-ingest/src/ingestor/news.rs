use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use time::{Date, Duration, PrimitiveDateTime};
use tidemark_core::{ArchiveBatch, Article, NewsProvider, SourceError, SourceId, TargetClock};
use tidemark_warehouse::{IngestStatus, NewsRecord, StoreSession};
use tracing::{info, info_span, warn, Instrument};

use super::{
    counted_write, log_entry, Ingestor, RunContext, ScopedSession, SourceOutcome, SourceStatus,
};
use crate::error::IngestError;
use crate::tagger::CoinTagger;
use crate::watermark::WatermarkStore;

const DATASET: &str = "crypto_news";

/// News query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsQuery {
    pub query: String,
    pub lookback_days: u32,
    pub page_size: u32,
}

/// Incremental news ingestion for one feed.
///
/// One fetch per run, starting from the later of the watermark date and the
/// lookback horizon. Articles are tagged, archived and written with `url` as
/// the natural key; the watermark moves to the newest publication time.
pub struct NewsIngestor {
    source: SourceId,
    provider: Arc<dyn NewsProvider>,
    query: NewsQuery,
    tagger: Arc<CoinTagger>,
    watermarks: Arc<WatermarkStore>,
}

impl NewsIngestor {
    pub fn new(
        source: SourceId,
        provider: Arc<dyn NewsProvider>,
        query: NewsQuery,
        tagger: Arc<CoinTagger>,
        watermarks: Arc<WatermarkStore>,
    ) -> Self {
        Self {
            source,
            provider,
            query,
            tagger,
            watermarks,
        }
    }

    async fn run_logged(&self, context: &RunContext) -> SourceOutcome {
        let timer = Instant::now();
        let started_at = context.clock.now();
        let mut rows = 0_u64;

        let outcome = match self.execute(context, started_at, &mut rows).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(source = %self.source, error = %failure, "news run failed");
                let message = format!("{failure} (rows inserted before failure: {rows})");
                context.log_best_effort(&log_entry(
                    &self.source,
                    IngestStatus::Failed,
                    message.clone(),
                    rows,
                    started_at,
                    context.clock.now(),
                ));
                SourceOutcome::new(self.source.as_str(), SourceStatus::Failed, rows, message)
            }
        };

        let outcome = outcome.with_elapsed(timer.elapsed());
        info!(
            source = %self.source,
            status = %outcome.status,
            rows = outcome.rows,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "news run finished"
        );
        outcome
    }

    async fn execute(
        &self,
        context: &RunContext,
        started_at: PrimitiveDateTime,
        rows: &mut u64,
    ) -> Result<SourceOutcome, IngestError> {
        let source = self.source.as_str();
        let session = ScopedSession::open(&context.warehouse)?;

        let watermark = session.with(|s| self.watermarks.get_last_success(s, source))?;
        let from_date = fetch_start(watermark, context.ceiling.date(), self.query.lookback_days);
        info!(source, watermark = %watermark, from_date = %from_date, query = %self.query.query, "fetching news");

        let articles = context
            .executor
            .run_if(
                &format!("fetch {source}"),
                || {
                    self.provider
                        .fetch(&self.query.query, from_date, self.query.page_size)
                },
                |error: &SourceError| error.retryable(),
            )
            .await?;

        if articles.is_empty() {
            warn!(source, from_date = %from_date, "no news fetched");
            let finished_at = context.clock.now();
            session.with(|s| {
                s.log_ingestion(&log_entry(
                    &self.source,
                    IngestStatus::Warning,
                    format!("no news fetched since {from_date}"),
                    0,
                    started_at,
                    finished_at,
                ))
            })?;
            return Ok(SourceOutcome::new(
                source,
                SourceStatus::Skipped,
                0,
                "no news fetched",
            ));
        }

        let records = to_news_records(&self.tagger, context.clock, articles);
        // Runs within one hour share a ceiling; stamp the batch by wall clock.
        let batch = ArchiveBatch::from_records(
            self.provider.name(),
            DATASET,
            source,
            "incremental",
            context.clock.now(),
            &records,
        )?;
        context
            .executor
            .run(&format!("archive {source}"), || context.archiver.archive(&batch))
            .await?;

        // One news feed writes per run, so the table count is this feed's.
        let ingested_at = context.clock.now();
        let (inserted, written) = counted_write(
            &session,
            StoreSession::count_news,
            context.executor.run(&format!("write {source}"), || {
                let result = session.with(|s| {
                    context.writer.insert(s, source, &records, ingested_at)
                });
                std::future::ready(result)
            }),
        )
        .await?;
        *rows = inserted;
        let report = written?;

        let finished_at = context.clock.now();
        let newest = records.iter().map(|record| record.published_at).max();
        session.with(|s| {
            s.log_ingestion(&log_entry(
                &self.source,
                IngestStatus::Success,
                format!(
                    "fetched={} inserted={} failed={}",
                    records.len(),
                    inserted,
                    report.failed
                ),
                inserted,
                started_at,
                finished_at,
            ))?;
            match newest {
                Some(newest) => self
                    .watermarks
                    .update_last_success(s, source, newest, finished_at)
                    .map(|_| ()),
                None => Ok(()),
            }
        })?;

        let status = if report.failed > 0 {
            SourceStatus::Warning
        } else {
            SourceStatus::Success
        };
        Ok(SourceOutcome::new(
            source,
            status,
            inserted,
            format!("rows={inserted} failed_rows={}", report.failed),
        ))
    }
}

impl Ingestor for NewsIngestor {
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

/// The later of the watermark's date and `today - lookback_days`.
pub(crate) fn fetch_start(watermark: PrimitiveDateTime, today: Date, lookback_days: u32) -> Date {
    let horizon = today - Duration::days(i64::from(lookback_days));
    watermark.date().max(horizon)
}

pub(crate) fn to_news_records(
    tagger: &CoinTagger,
    clock: TargetClock,
    articles: Vec<Article>,
) -> Vec<NewsRecord> {
    articles
        .into_iter()
        .map(|article| {
            let published_at = clock.to_local(article.published_at);
            NewsRecord {
                coin_tag: tagger
                    .tag(article.title.as_deref(), article.content.as_deref())
                    .to_owned(),
                title: article.title,
                description: article.description,
                content: article.content,
                published_at,
                news_date: published_at.date(),
                source_name: article.source_name,
                url: article.url,
            }
        })
        .collect()
}
