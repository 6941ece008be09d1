//! # Tidemark Ingest
//!
//! Watermark-driven incremental ingestion of hourly crypto prices and news.
//!
//! Each configured source resumes from its own watermark, catches up to the
//! run ceiling in bounded windows, and records every step in the audit log.
//! Sources run concurrently under a bounded worker pool; one failing source
//! never stops its siblings.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bulk`] | One-shot historical price load |
//! | [`config`] | `tidemark.toml` loading with environment overrides |
//! | [`dedup`] | Batched, idempotent writes with row-level fallback |
//! | [`error`] | Config, ingest and run errors |
//! | [`ingestor`] | Price and news source runs |
//! | [`orchestrator`] | Bounded concurrent fan-out |
//! | [`planner`] | Catch-up window planning |
//! | [`quality`] | Non-blocking row checks |
//! | [`summary`] | Run totals and the SUMMARY audit entry |
//! | [`tagger`] | Keyword coin tagging for articles |
//! | [`watermark`] | Resume-point resolution and advancement |
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = IngestConfig::load(None)?;
//! let warehouse = Warehouse::open(config.warehouse_config())?;
//! warehouse.initialize()?;
//!
//! let context = Arc::new(RunContext::new(warehouse.clone(), config.clock()?, executor, archiver));
//! let started = context.clock.now();
//! let outcomes = Orchestrator::new(config.pool).run(Arc::clone(&context), ingestors).await?;
//! let summary = RunSummary::from_outcomes("CRYPTO", outcomes, started, context.clock.now(), elapsed);
//! summary.persist(&warehouse);
//! ```

pub mod bulk;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingestor;
pub mod orchestrator;
pub mod planner;
pub mod quality;
pub mod summary;
pub mod tagger;
pub mod watermark;

pub use bulk::{BulkLoadReport, BulkLoader};
pub use config::{
    ArchiveSettings, BackoffKind, ClockSettings, CryptoSettings, IngestConfig, NewsSettings,
    RetrySettings, StoreSettings, DEFAULT_CONFIG_FILE,
};
pub use dedup::{BatchSizePolicy, DedupRow, DedupWriter, WriteReport};
pub use error::{ConfigError, IngestError, RunError};
pub use ingestor::{
    Ingestor, NewsIngestor, NewsQuery, PriceIngestor, RunContext, SourceOutcome, SourceStatus,
};
pub use orchestrator::{Orchestrator, WorkerPoolPolicy};
pub use planner::{BatchPlanner, BatchWindows};
pub use quality::{NonPositiveClose, QualityIssue, QualityRule, QualityValidator};
pub use summary::RunSummary;
pub use tagger::{CoinTagger, UNTAGGED};
pub use watermark::{
    FixedEpoch, MaxPriceTimestamp, ResolvedWatermark, StoredWatermark, WatermarkFallback,
    WatermarkStore,
};
