//! Behavior-driven tests for concurrent source runs.
//!
//! These tests verify the worker bound, fault isolation between sources and
//! that every source is accounted for in the run's outcomes and audit log.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tidemark_core::SourceId;
use tidemark_ingest::{
    Ingestor, Orchestrator, RunContext, RunSummary, SourceOutcome, SourceStatus, WorkerPoolPolicy,
};
use tidemark_tests::{context, harness, price_ingestor, source, FakePriceProvider, PriceScript};
use tidemark_warehouse::IngestStatus;

/// Tracks how many runs are in flight at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct SlowIngestor {
    source: SourceId,
    gauge: Arc<Gauge>,
}

impl Ingestor for SlowIngestor {
    fn source(&self) -> &SourceId {
        &self.source
    }

    fn run<'a>(
        &'a self,
        _context: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = SourceOutcome> + Send + 'a>> {
        Box::pin(async move {
            let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.gauge.current.fetch_sub(1, Ordering::SeqCst);
            SourceOutcome::new(self.source.as_str(), SourceStatus::Success, 1, "ok")
        })
    }
}

struct PanickingIngestor {
    source: SourceId,
}

impl Ingestor for PanickingIngestor {
    fn source(&self) -> &SourceId {
        &self.source
    }

    fn run<'a>(
        &'a self,
        _context: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = SourceOutcome> + Send + 'a>> {
        Box::pin(async move {
            if !self.source.as_str().is_empty() {
                panic!("parser blew up for {}", self.source);
            }
            SourceOutcome::new(self.source.as_str(), SourceStatus::Success, 0, "")
        })
    }
}

#[tokio::test]
async fn when_many_sources_run_the_worker_bound_is_respected() {
    // Given: Eight slow sources and the default pool (three workers for 6-10)
    let (warehouse, archiver) = harness();
    let gauge = Arc::new(Gauge::default());
    let ingestors = (0..8)
        .map(|index| {
            Arc::new(SlowIngestor {
                source: source(&format!("COIN{index}-USD")),
                gauge: Arc::clone(&gauge),
            }) as Arc<dyn Ingestor>
        })
        .collect::<Vec<_>>();

    // When: They all run
    let outcomes = Orchestrator::default()
        .run(context(&warehouse, archiver), ingestors)
        .await
        .expect("precheck passes");

    // Then: Every source finished and at most three ran at once
    assert_eq!(outcomes.len(), 8);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency was {peak}");
    assert!(peak >= 1);
}

#[tokio::test]
async fn when_a_single_worker_is_configured_sources_run_one_at_a_time() {
    // Given: A pool policy allowing one worker
    let (warehouse, archiver) = harness();
    let gauge = Arc::new(Gauge::default());
    let ingestors = (0..3)
        .map(|index| {
            Arc::new(SlowIngestor {
                source: source(&format!("PAIR{index}")),
                gauge: Arc::clone(&gauge),
            }) as Arc<dyn Ingestor>
        })
        .collect::<Vec<_>>();
    let policy = WorkerPoolPolicy {
        small_workers: 1,
        ..WorkerPoolPolicy::default()
    };

    // When: They run
    Orchestrator::new(policy)
        .run(context(&warehouse, archiver), ingestors)
        .await
        .expect("precheck passes");

    // Then: No two overlapped
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn when_one_source_panics_its_siblings_still_complete() {
    // Given: A panicking source between two healthy ones
    let (warehouse, archiver) = harness();
    let ingestors: Vec<Arc<dyn Ingestor>> = vec![
        price_ingestor("BTC-USD", FakePriceProvider::new(PriceScript::Hourly)),
        Arc::new(PanickingIngestor {
            source: source("BROKEN"),
        }),
        price_ingestor("ETH-USD", FakePriceProvider::new(PriceScript::Hourly)),
    ];

    // When: The run completes
    let outcomes = Orchestrator::default()
        .run(context(&warehouse, archiver), ingestors)
        .await
        .expect("precheck passes");
    let summary = RunSummary::from_outcomes(
        "CRYPTO",
        outcomes,
        tidemark_tests::CEILING,
        tidemark_tests::CEILING,
        Duration::ZERO,
    );

    // Then: The panic became a FAILED outcome and the rest succeeded
    assert_eq!(summary.outcomes.len(), 3);
    assert_eq!((summary.success, summary.failed), (2, 1));
    let broken = summary
        .outcomes
        .iter()
        .find(|outcome| outcome.source == "BROKEN")
        .expect("broken outcome");
    assert_eq!(broken.status, SourceStatus::Failed);
    assert!(broken.message.contains("parser blew up"), "{}", broken.message);
    assert_eq!(summary.rows, 24);
}

#[tokio::test]
async fn when_a_source_panics_its_failure_is_in_the_audit_log() {
    // Given: A panicking source next to a healthy one
    let (warehouse, archiver) = harness();
    let ingestors: Vec<Arc<dyn Ingestor>> = vec![
        Arc::new(PanickingIngestor {
            source: source("BROKEN"),
        }),
        price_ingestor("BTC-USD", FakePriceProvider::new(PriceScript::Hourly)),
    ];

    // When: The run completes
    Orchestrator::default()
        .run(context(&warehouse, archiver), ingestors)
        .await
        .expect("precheck passes");

    // Then: The panicked source has exactly one FAILED audit entry
    let session = warehouse.session().expect("session");
    let entries = session
        .recent_log_entries(Some("BROKEN"), 10)
        .expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, IngestStatus::Failed);
    assert!(entries[0].message.contains("parser blew up"), "{}", entries[0].message);
    assert_eq!(entries[0].rows_inserted, 0);
}

#[tokio::test]
async fn an_empty_source_list_yields_no_outcomes() {
    let (warehouse, archiver) = harness();

    let outcomes = Orchestrator::default()
        .run(context(&warehouse, archiver), Vec::new())
        .await
        .expect("precheck passes");

    assert!(outcomes.is_empty());
}
