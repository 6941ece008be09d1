//! Behavior-driven tests for end-to-end ingestion runs.
//!
//! Each test drives real ingestors against an in-memory warehouse with
//! scripted providers and checks what an operator would see afterwards:
//! outcomes, stored rows, watermarks and the audit log.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tidemark_core::{ArchiveFormat, Interval, LocalArchiver};
use tidemark_ingest::{BulkLoader, DedupWriter, Orchestrator, RunSummary, SourceStatus};
use tidemark_tests::{
    article, context, context_at, harness, news_ingestor, price_ingestor, FailingArchiver,
    FakeNewsProvider, FakePriceProvider, PriceScript, CEILING, EPOCH,
};
use tidemark_warehouse::{IngestStatus, PriceRecord};
use time::macros::{date, datetime};

// =============================================================================
// Price runs
// =============================================================================

#[tokio::test]
async fn when_a_new_source_runs_it_ingests_from_the_epoch_and_advances_its_watermark() {
    // Given: A source with no watermark and no stored prices
    let (warehouse, archiver) = harness();
    let provider = FakePriceProvider::new(PriceScript::Hourly);
    let ingestor = price_ingestor("BTC-USD", provider.clone());
    let context = context_at(&warehouse, archiver.clone(), datetime!(2024-01-01 03:00));

    // When: One run covers the single planned window
    let outcome = ingestor.run(&context).await;

    // Then: Three rows land and the watermark sits at the window end
    assert_eq!(outcome.status, SourceStatus::Success, "{}", outcome.message);
    assert_eq!(outcome.rows, 3);
    assert_eq!(provider.calls(), 1);

    let session = warehouse.session().expect("session");
    assert_eq!(session.count_prices("BTC-USD").expect("count"), 3);
    assert_eq!(
        session.read_watermark("BTC-USD").expect("watermark"),
        Some(datetime!(2024-01-01 03:00))
    );

    let entries = session
        .recent_log_entries(Some("BTC-USD"), 10)
        .expect("log entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, IngestStatus::Success);
    assert_eq!(entries[0].rows_inserted, 3);
}

#[tokio::test]
async fn when_a_source_is_already_at_the_ceiling_it_is_skipped_without_fetching() {
    // Given: A watermark equal to the run ceiling
    let (warehouse, archiver) = harness();
    warehouse
        .session()
        .expect("session")
        .advance_watermark("ETH-USD", CEILING, CEILING)
        .expect("seed watermark");
    let provider = FakePriceProvider::new(PriceScript::Hourly);
    let ingestor = price_ingestor("ETH-USD", provider.clone());

    // When: The source runs
    let outcome = ingestor.run(&context(&warehouse, archiver.clone())).await;

    // Then: Nothing is fetched and one SKIPPED entry is logged
    assert_eq!(outcome.status, SourceStatus::Skipped);
    assert_eq!(outcome.rows, 0);
    assert_eq!(provider.calls(), 0);
    assert!(archiver.batches().is_empty());

    let entries = warehouse
        .session()
        .expect("session")
        .recent_log_entries(Some("ETH-USD"), 10)
        .expect("log entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, IngestStatus::Skipped);
}

#[tokio::test]
async fn when_a_window_comes_back_empty_the_run_warns_and_still_moves_past_it() {
    // Given: A provider with nothing for the first of two windows
    let (warehouse, archiver) = harness();
    let provider = FakePriceProvider::new(PriceScript::EmptyFirstCall);
    let ingestor = price_ingestor("SOL-USD", provider.clone());

    // When: The source catches up from the epoch to the ceiling
    let outcome = ingestor.run(&context(&warehouse, archiver)).await;

    // Then: The second window's rows land and the watermark reaches the ceiling
    assert_eq!(outcome.status, SourceStatus::Success, "{}", outcome.message);
    assert_eq!(outcome.rows, 6);
    assert_eq!(provider.calls(), 2);

    let session = warehouse.session().expect("session");
    assert_eq!(session.count_prices("SOL-USD").expect("count"), 6);
    assert_eq!(
        session.read_watermark("SOL-USD").expect("watermark"),
        Some(CEILING)
    );

    let mut statuses = session
        .recent_log_entries(Some("SOL-USD"), 10)
        .expect("log entries")
        .into_iter()
        .map(|entry| entry.status)
        .collect::<Vec<_>>();
    statuses.sort();
    assert_eq!(statuses, vec![IngestStatus::Success, IngestStatus::Warning]);
}

#[tokio::test]
async fn when_two_sources_run_and_one_provider_is_down_the_summary_counts_both() {
    for reverse in [false, true] {
        // Given: One healthy source and one whose provider always fails
        let (warehouse, archiver) = harness();
        let failing = FakePriceProvider::new(PriceScript::AlwaysUnavailable);
        let mut ingestors = vec![
            price_ingestor("BTC-USD", FakePriceProvider::new(PriceScript::Hourly)),
            price_ingestor("ETH-USD", failing.clone()),
        ];
        if reverse {
            ingestors.reverse();
        }

        // When: Both run concurrently
        let outcomes = Orchestrator::default()
            .run(context(&warehouse, archiver), ingestors)
            .await
            .expect("precheck passes");
        let summary = RunSummary::from_outcomes(
            "CRYPTO",
            outcomes,
            CEILING,
            CEILING,
            std::time::Duration::ZERO,
        );

        // Then: Totals are exact whatever the completion order
        assert_eq!((summary.success, summary.failed), (1, 1));
        assert_eq!((summary.warning, summary.skipped), (0, 0));
        assert_eq!(summary.rows, 12);
        assert_eq!(summary.outcomes[0].source, "BTC-USD");
        assert_eq!(summary.outcomes[1].status, SourceStatus::Failed);

        // And: The failing source retried, logged FAILED and kept no watermark
        assert_eq!(failing.calls(), 2);
        let session = warehouse.session().expect("session");
        assert_eq!(session.read_watermark("ETH-USD").expect("watermark"), None);
        let entries = session
            .recent_log_entries(Some("ETH-USD"), 10)
            .expect("log entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, IngestStatus::Failed);
    }
}

#[tokio::test]
async fn when_a_source_runs_twice_the_second_run_adds_nothing() {
    // Given: A completed run
    let (warehouse, archiver) = harness();
    let provider = FakePriceProvider::new(PriceScript::Hourly);
    let ingestor = price_ingestor("XRP-USD", provider.clone());
    let first = ingestor.run(&context(&warehouse, archiver.clone())).await;
    assert_eq!(first.rows, 12);

    // When: The same run is repeated at the same ceiling
    let second = ingestor.run(&context(&warehouse, archiver)).await;

    // Then: It is skipped and the table is unchanged
    assert_eq!(second.status, SourceStatus::Skipped);
    assert_eq!(provider.calls(), 2);
    assert_eq!(
        warehouse
            .session()
            .expect("session")
            .count_prices("XRP-USD")
            .expect("count"),
        12
    );
}

#[tokio::test]
async fn when_the_watermark_is_missing_the_newest_stored_price_is_the_resume_point() {
    // Given: Prices stored for 01:00 through 06:00 but no watermark row
    let (warehouse, archiver) = harness();
    let stored = (1..=6)
        .map(|hour| PriceRecord {
            date: date!(2024 - 01 - 01),
            hour,
            source: String::from("DOGE-USD"),
            open: Some(0.1),
            high: Some(0.1),
            low: Some(0.1),
            close: Some(0.1),
            volume: Some(10),
        })
        .collect::<Vec<_>>();
    {
        let session = warehouse.session().expect("session");
        DedupWriter::default()
            .insert(&session, "DOGE-USD", &stored, CEILING)
            .expect("seed prices");
    }

    // When: The next run reaches the ceiling
    let provider = FakePriceProvider::new(PriceScript::Hourly);
    let outcome = price_ingestor("DOGE-USD", provider.clone())
        .run(&context(&warehouse, archiver))
        .await;

    // Then: Only the hours after the newest stored price are fetched
    assert_eq!(outcome.rows, 6);
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        warehouse
            .session()
            .expect("session")
            .count_prices("DOGE-USD")
            .expect("count"),
        12
    );
}

#[tokio::test]
async fn every_window_is_archived_before_its_rows_are_written() {
    // Given: A source catching up over two windows
    let (warehouse, archiver) = harness();
    let ingestor = price_ingestor("BTC-USD", FakePriceProvider::new(PriceScript::Hourly));

    // When: It runs
    ingestor.run(&context(&warehouse, archiver.clone())).await;

    // Then: Each archive call saw only the rows of earlier windows
    let batches = archiver.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].stored_before, Some(0));
    assert_eq!(batches[1].stored_before, Some(6));
    assert!(batches
        .iter()
        .all(|batch| batch.dataset == "crypto_price" && batch.label == "incremental"));
}

#[tokio::test]
async fn when_archiving_fails_nothing_is_written_and_the_watermark_stays() {
    // Given: An archiver that always fails
    let (warehouse, _) = harness();
    let ingestor = price_ingestor("ADA-USD", FakePriceProvider::new(PriceScript::Hourly));

    // When: The source runs
    let outcome = ingestor
        .run(&context(&warehouse, Arc::new(FailingArchiver)))
        .await;

    // Then: The run fails before any write
    assert_eq!(outcome.status, SourceStatus::Failed);
    assert!(outcome.message.contains("archive"), "{}", outcome.message);
    let session = warehouse.session().expect("session");
    assert_eq!(session.count_prices("ADA-USD").expect("count"), 0);
    assert_eq!(session.read_watermark("ADA-USD").expect("watermark"), None);
}

#[tokio::test]
async fn quality_issues_are_recorded_without_blocking_the_write() {
    // Given: A provider whose first bar of each window has a zero close
    let (warehouse, archiver) = harness();
    let ingestor = price_ingestor("BNB-USD", FakePriceProvider::new(PriceScript::ZeroCloseFirstBar));

    // When: The source runs
    let outcome = ingestor.run(&context(&warehouse, archiver)).await;

    // Then: Every row is stored and each bad close is logged once
    assert_eq!(outcome.status, SourceStatus::Success);
    assert_eq!(outcome.rows, 12);
    let session = warehouse.session().expect("session");
    assert_eq!(session.count_quality_issues("BNB-USD").expect("count"), 2);
}

// =============================================================================
// News runs
// =============================================================================

#[tokio::test]
async fn when_news_arrives_it_is_tagged_stored_once_and_moves_the_watermark() {
    // Given: Three articles, one of them repeated
    let (warehouse, archiver) = harness();
    let provider = FakeNewsProvider::new(vec![
        article("https://news.test/a", "Bitcoin ETF inflows", datetime!(2024-01-01 02:00 UTC)),
        article("https://news.test/b", "Markets wrap", datetime!(2024-01-01 03:00 UTC)),
        article("https://news.test/a", "Bitcoin ETF inflows", datetime!(2024-01-01 02:00 UTC)),
    ]);
    let ingestor = news_ingestor(provider.clone());

    // When: The news source runs
    let outcome = ingestor.run(&context(&warehouse, archiver.clone())).await;

    // Then: Unique urls are stored and the watermark is the newest article
    assert_eq!(outcome.status, SourceStatus::Success, "{}", outcome.message);
    assert_eq!(outcome.rows, 2);
    let session = warehouse.session().expect("session");
    assert_eq!(session.count_news().expect("count"), 2);
    assert_eq!(
        session.read_watermark("NEWSAPI").expect("watermark"),
        Some(datetime!(2024-01-01 10:00))
    );
    assert_eq!(provider.from_dates(), vec![EPOCH.date()]);

    let batches = archiver.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].dataset, "crypto_news");
    assert_eq!(batches[0].rows, 3);
}

#[tokio::test]
async fn when_no_news_is_found_the_run_is_skipped_with_a_warning() {
    // Given: A provider with no articles
    let (warehouse, archiver) = harness();
    let provider = FakeNewsProvider::new(Vec::new());

    // When: The news source runs
    let outcome = news_ingestor(provider.clone())
        .run(&context(&warehouse, archiver.clone()))
        .await;

    // Then: SKIPPED outcome, WARNING audit entry, no archive
    assert_eq!(outcome.status, SourceStatus::Skipped);
    assert_eq!(provider.calls(), 1);
    assert!(archiver.batches().is_empty());
    let entries = warehouse
        .session()
        .expect("session")
        .recent_log_entries(Some("NEWSAPI"), 10)
        .expect("log entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, IngestStatus::Warning);
}

#[tokio::test]
async fn news_runs_sharing_a_ceiling_keep_separate_archives() {
    // Given: A file archiver and two news runs in the same hour
    let temp = tempfile::tempdir().expect("tempdir");
    let (warehouse, _) = harness();
    let archiver = Arc::new(LocalArchiver::new(temp.path(), ArchiveFormat::Ndjson));
    let first = FakeNewsProvider::new(vec![article(
        "https://news.test/first",
        "Bitcoin opens higher",
        datetime!(2024-01-01 02:00 UTC),
    )]);
    let second = FakeNewsProvider::new(vec![article(
        "https://news.test/second",
        "Ethereum upgrade lands",
        datetime!(2024-01-01 03:00 UTC),
    )]);

    // When: Both runs complete
    for provider in [first, second] {
        let outcome = news_ingestor(provider)
            .run(&context(&warehouse, archiver.clone()))
            .await;
        assert_eq!(outcome.status, SourceStatus::Success, "{}", outcome.message);
    }

    // Then: Each run's raw batch is still on disk
    let files = archived_files(temp.path());
    assert_eq!(files.len(), 2, "{files:?}");
    let archived = files
        .iter()
        .map(|path| fs::read_to_string(path).expect("archive readable"))
        .collect::<String>();
    assert!(archived.contains("https://news.test/first"));
    assert!(archived.contains("https://news.test/second"));
    assert_eq!(warehouse.session().expect("session").count_news().expect("count"), 2);
}

fn archived_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).expect("archive dir readable") {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}

// =============================================================================
// Bulk load
// =============================================================================

#[tokio::test]
async fn bulk_load_fills_history_without_touching_the_watermark() {
    // Given: An empty store and a day range ending at the run ceiling
    let (warehouse, archiver) = harness();
    let provider = FakePriceProvider::new(PriceScript::Hourly);
    let loader = BulkLoader::new(provider.clone(), Interval::OneHour);
    let context = context(&warehouse, archiver.clone());
    let btc = tidemark_tests::source("BTC-USD");

    // When: The same day is loaded twice
    let first = loader
        .load(&context, &btc, date!(2024 - 01 - 01), date!(2024 - 01 - 01))
        .await
        .expect("first load");
    let second = loader
        .load(&context, &btc, date!(2024 - 01 - 01), date!(2024 - 01 - 01))
        .await
        .expect("second load");

    // Then: Hours up to the ceiling land once and no watermark is written
    assert_eq!((first.fetched, first.loaded, first.chunks), (13, 13, 1));
    assert_eq!(second.loaded, 0);
    let session = warehouse.session().expect("session");
    assert_eq!(session.count_prices("BTC-USD").expect("count"), 13);
    assert_eq!(session.read_watermark("BTC-USD").expect("watermark"), None);
    assert!(archiver.batches().iter().all(|batch| batch.label == "bulk"));
}

#[tokio::test]
async fn bulk_load_rejects_an_inverted_range() {
    let (warehouse, archiver) = harness();
    let provider = FakePriceProvider::new(PriceScript::Hourly);
    let loader = BulkLoader::new(provider.clone(), Interval::OneHour).with_archive(false);

    let result = loader
        .load(
            &context(&warehouse, archiver),
            &tidemark_tests::source("ETH-USD"),
            date!(2024 - 01 - 05),
            date!(2024 - 01 - 01),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(provider.calls(), 0);
}
