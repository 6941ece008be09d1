//! Per-source ingestion runs.
//!
//! An [`Ingestor`] drives one source from its watermark up to the run ceiling
//! and always finishes with a [`SourceOutcome`]; failures inside the run are
//! recorded in the audit log and reported as [`SourceStatus::Failed`].

mod news;
mod price;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::PrimitiveDateTime;
use tidemark_core::{RawArchiver, RetryExecutor, SourceId, TargetClock};
use tidemark_warehouse::{IngestStatus, IngestionLogEntry, StoreSession, Warehouse, WarehouseError};
use tracing::error;

use crate::dedup::DedupWriter;

pub use news::{NewsIngestor, NewsQuery};
pub use price::PriceIngestor;
pub(crate) use price::to_price_records;

/// Terminal status of one source run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceStatus {
    Success,
    /// Completed, but some rows could not be written.
    Warning,
    Failed,
    /// Nothing to do: already up to date, or the provider had nothing new.
    Skipped,
}

impl SourceStatus {
    pub const fn as_str(self) -> &'static str {
        self.log_status().as_str()
    }

    pub const fn log_status(self) -> IngestStatus {
        match self {
            Self::Success => IngestStatus::Success,
            Self::Warning => IngestStatus::Warning,
            Self::Failed => IngestStatus::Failed,
            Self::Skipped => IngestStatus::Skipped,
        }
    }
}

impl Display for SourceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one source run, consumed by [`crate::RunSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    /// Rows newly written during the run, including partial progress of a
    /// failed run.
    pub rows: u64,
    pub message: String,
    pub elapsed: Duration,
}

impl SourceOutcome {
    pub fn new(
        source: impl Into<String>,
        status: SourceStatus,
        rows: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            status,
            rows,
            message: message.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// Collaborators shared by every ingestor of one run.
#[derive(Clone)]
pub struct RunContext {
    pub warehouse: Warehouse,
    pub clock: TargetClock,
    /// Backfill ceiling for every source in this run.
    pub ceiling: PrimitiveDateTime,
    pub executor: RetryExecutor,
    pub archiver: Arc<dyn RawArchiver>,
    pub writer: DedupWriter,
}

impl RunContext {
    /// Context whose ceiling is the current hour in `clock`.
    pub fn new(
        warehouse: Warehouse,
        clock: TargetClock,
        executor: RetryExecutor,
        archiver: Arc<dyn RawArchiver>,
    ) -> Self {
        Self {
            warehouse,
            clock,
            ceiling: clock.current_run_ceiling(),
            executor,
            archiver,
            writer: DedupWriter::default(),
        }
    }

    pub fn with_ceiling(mut self, ceiling: PrimitiveDateTime) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_writer(mut self, writer: DedupWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Append an audit entry on a fresh connection, logging instead of failing.
    pub(crate) fn log_best_effort(&self, entry: &IngestionLogEntry) {
        let result = self
            .warehouse
            .session()
            .and_then(|session| session.log_ingestion(entry));
        if let Err(log_error) = result {
            error!(source = %entry.source, error = %log_error, "failed to write ingestion log entry");
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("clock", &self.clock)
            .field("ceiling", &self.ceiling)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// One source's catch-up run.
pub trait Ingestor: Send + Sync {
    fn source(&self) -> &SourceId;

    /// Run to completion. Never fails: errors become a FAILED outcome.
    fn run<'a>(
        &'a self,
        context: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = SourceOutcome> + Send + 'a>>;
}

/// The run's own connection, reachable from retried closures.
///
/// [`StoreSession`] is not `Sync`; the mutex lets retry closures borrow it
/// without holding the lock across an await point.
pub(crate) struct ScopedSession(Mutex<StoreSession>);

impl ScopedSession {
    pub(crate) fn open(warehouse: &Warehouse) -> Result<Self, WarehouseError> {
        Ok(Self(Mutex::new(warehouse.session()?)))
    }

    pub(crate) fn with<T>(
        &self,
        work: impl FnOnce(&StoreSession) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let session = self.0.lock().map_err(|_| WarehouseError::PoolPoisoned)?;
        work(&session)
    }
}

/// Run `write` and measure the rows it added with `count`, taken before and
/// after.
///
/// A retried write restarts from its first batch, so batches committed by a
/// failed attempt only show up in the stored count.
pub(crate) async fn counted_write<T, E>(
    session: &ScopedSession,
    count: impl Fn(&StoreSession) -> Result<u64, WarehouseError>,
    write: impl Future<Output = Result<T, E>>,
) -> Result<(u64, Result<T, E>), WarehouseError> {
    let before = session.with(&count)?;
    let written = write.await;
    let after = session.with(&count)?;
    Ok((after.saturating_sub(before), written))
}

pub(crate) fn log_entry(
    source: &SourceId,
    status: IngestStatus,
    message: impl Into<String>,
    rows_inserted: u64,
    started_at: PrimitiveDateTime,
    finished_at: PrimitiveDateTime,
) -> IngestionLogEntry {
    IngestionLogEntry {
        source: source.as_str().to_owned(),
        status,
        message: message.into(),
        rows_inserted,
        started_at,
        finished_at,
    }
}
