//! Shared fakes and fixtures for the tidemark behavior tests.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::macros::datetime;
use time::{Date, PrimitiveDateTime};
use tidemark_core::{
    ArchiveBatch, ArchiveError, ArchiveFormat, ArchiveHandle, Article, FetchWindow, Interval,
    NewsProvider, PriceProvider, ProviderBar, RawArchiver, RetryExecutor, RetryPolicy,
    SourceError, SourceId, TargetClock,
};
use tidemark_ingest::{
    BatchPlanner, CoinTagger, Ingestor, NewsIngestor, NewsQuery, PriceIngestor, QualityValidator,
    RunContext, WatermarkStore,
};
use tidemark_warehouse::Warehouse;

/// Resume point for sources with no history.
pub const EPOCH: PrimitiveDateTime = datetime!(2024-01-01 00:00);
/// Run ceiling used by every scenario (target clock, UTC+7).
pub const CEILING: PrimitiveDateTime = datetime!(2024-01-01 12:00);

pub fn source(symbol: &str) -> SourceId {
    SourceId::parse(symbol).expect("valid source")
}

/// In-memory warehouse plus a recording archiver that observes it.
pub fn harness() -> (Warehouse, Arc<RecordingArchiver>) {
    let warehouse = Warehouse::open_in_memory().expect("in-memory warehouse");
    let archiver = Arc::new(RecordingArchiver::observing(warehouse.clone()));
    (warehouse, archiver)
}

/// Run context at [`CEILING`] with fast retries.
pub fn context(warehouse: &Warehouse, archiver: Arc<dyn RawArchiver>) -> Arc<RunContext> {
    context_at(warehouse, archiver, CEILING)
}

pub fn context_at(
    warehouse: &Warehouse,
    archiver: Arc<dyn RawArchiver>,
    ceiling: PrimitiveDateTime,
) -> Arc<RunContext> {
    Arc::new(
        RunContext::new(
            warehouse.clone(),
            TargetClock::default(),
            RetryExecutor::new(RetryPolicy::fixed(2, Duration::ZERO)),
            archiver,
        )
        .with_ceiling(ceiling),
    )
}

pub fn price_ingestor(symbol: &str, provider: Arc<dyn PriceProvider>) -> Arc<dyn Ingestor> {
    Arc::new(PriceIngestor::new(
        source(symbol),
        provider,
        Interval::OneHour,
        BatchPlanner::new(Interval::OneHour, time::Duration::hours(6)),
        Arc::new(WatermarkStore::for_prices(EPOCH)),
        Arc::new(QualityValidator::default()),
    ))
}

pub fn news_ingestor(provider: Arc<dyn NewsProvider>) -> Arc<dyn Ingestor> {
    Arc::new(NewsIngestor::new(
        source("NEWSAPI"),
        provider,
        NewsQuery {
            query: String::from("crypto"),
            lookback_days: 1,
            page_size: 100,
        },
        Arc::new(CoinTagger::default()),
        Arc::new(WatermarkStore::for_news(EPOCH)),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceScript {
    /// One bar per hour of the requested window.
    Hourly,
    /// No bars on the first call, hourly afterwards.
    EmptyFirstCall,
    /// Every call fails with a retryable error.
    AlwaysUnavailable,
    /// Hourly bars, with a non-positive close on the first bar of each call.
    ZeroCloseFirstBar,
}

/// Scripted price provider counting its calls.
pub struct FakePriceProvider {
    script: PriceScript,
    calls: AtomicUsize,
    windows: Mutex<Vec<FetchWindow>>,
}

impl FakePriceProvider {
    pub fn new(script: PriceScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            windows: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn windows(&self) -> Vec<FetchWindow> {
        self.windows.lock().expect("windows lock").clone()
    }
}

pub fn hourly_bars(window: FetchWindow) -> Vec<ProviderBar> {
    let mut bars = Vec::new();
    let mut ts = window.start;
    let mut step = 0_u32;
    while ts <= window.end {
        let close = 100.0 + f64::from(step);
        bars.push(ProviderBar {
            ts,
            open: Some(close - 0.5),
            high: Some(close + 1.0),
            low: Some(close - 1.0),
            close: Some(close),
            volume: Some(1_000),
        });
        ts += time::Duration::hours(1);
        step += 1;
    }
    bars
}

impl PriceProvider for FakePriceProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn fetch<'a>(
        &'a self,
        _source: &'a SourceId,
        window: FetchWindow,
        _interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ProviderBar>, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.windows.lock().expect("windows lock").push(window);
            match self.script {
                PriceScript::Hourly => Ok(hourly_bars(window)),
                PriceScript::EmptyFirstCall if call == 0 => Ok(Vec::new()),
                PriceScript::EmptyFirstCall => Ok(hourly_bars(window)),
                PriceScript::AlwaysUnavailable => {
                    Err(SourceError::unavailable("upstream returned 503"))
                }
                PriceScript::ZeroCloseFirstBar => {
                    let mut bars = hourly_bars(window);
                    if let Some(first) = bars.first_mut() {
                        first.close = Some(0.0);
                    }
                    Ok(bars)
                }
            }
        })
    }
}

/// News provider returning a fixed article list.
pub struct FakeNewsProvider {
    articles: Vec<Article>,
    calls: AtomicUsize,
    from_dates: Mutex<Vec<Date>>,
}

impl FakeNewsProvider {
    pub fn new(articles: Vec<Article>) -> Arc<Self> {
        Arc::new(Self {
            articles,
            calls: AtomicUsize::new(0),
            from_dates: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn from_dates(&self) -> Vec<Date> {
        self.from_dates.lock().expect("dates lock").clone()
    }
}

impl NewsProvider for FakeNewsProvider {
    fn name(&self) -> &'static str {
        "fake-news"
    }

    fn fetch<'a>(
        &'a self,
        _query: &'a str,
        from_date: Date,
        page_size: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Article>, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.from_dates.lock().expect("dates lock").push(from_date);
            let limit = usize::try_from(page_size).unwrap_or(usize::MAX);
            Ok(self.articles.iter().take(limit).cloned().collect())
        })
    }
}

pub fn article(url: &str, title: &str, published_at: time::OffsetDateTime) -> Article {
    Article {
        title: Some(title.to_owned()),
        description: None,
        content: None,
        published_at,
        source_name: Some(String::from("Wire")),
        url: url.to_owned(),
    }
}

/// One archived batch as seen by [`RecordingArchiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedBatch {
    pub source: String,
    pub dataset: String,
    pub label: String,
    pub rows: usize,
    /// Rows already stored for the source when the batch was archived.
    pub stored_before: Option<u64>,
}

/// Archiver keeping batches in memory.
pub struct RecordingArchiver {
    observed: Option<Warehouse>,
    batches: Mutex<Vec<ArchivedBatch>>,
}

impl RecordingArchiver {
    pub fn new() -> Self {
        Self {
            observed: None,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn observing(warehouse: Warehouse) -> Self {
        Self {
            observed: Some(warehouse),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<ArchivedBatch> {
        self.batches.lock().expect("batches lock").clone()
    }
}

impl RawArchiver for RecordingArchiver {
    fn archive<'a>(
        &'a self,
        batch: &'a ArchiveBatch,
    ) -> Pin<Box<dyn Future<Output = Result<ArchiveHandle, ArchiveError>> + Send + 'a>> {
        Box::pin(async move {
            let stored_before = match &self.observed {
                Some(warehouse) => Some(warehouse.session()?.count_prices(&batch.source)?),
                None => None,
            };
            self.batches
                .lock()
                .expect("batches lock")
                .push(ArchivedBatch {
                    source: batch.source.clone(),
                    dataset: batch.dataset.clone(),
                    label: batch.label.clone(),
                    rows: batch.len(),
                    stored_before,
                });
            Ok(ArchiveHandle {
                path: PathBuf::from(format!("memory://{}/{}", batch.source, batch.label)),
                rows: batch.len() as u64,
                format: ArchiveFormat::Ndjson,
            })
        })
    }
}

/// Archiver that always fails.
pub struct FailingArchiver;

impl RawArchiver for FailingArchiver {
    fn archive<'a>(
        &'a self,
        _batch: &'a ArchiveBatch,
    ) -> Pin<Box<dyn Future<Output = Result<ArchiveHandle, ArchiveError>> + Send + 'a>> {
        Box::pin(async { Err(ArchiveError::Encoding(String::from("disk full"))) })
    }
}
