//! Insert-if-absent writes with adaptive batching and row-level fallback.

use time::PrimitiveDateTime;
use tidemark_warehouse::{NewsRecord, PriceRecord, StoreSession, WarehouseError};
use tracing::{debug, error, warn};

/// A row with a natural key the store can check on insert.
pub trait DedupRow {
    /// Insert unless the natural key already exists; returns rows written.
    fn insert_if_absent(
        &self,
        session: &StoreSession,
        ingested_at: PrimitiveDateTime,
    ) -> Result<usize, WarehouseError>;

    /// Natural key, for log lines.
    fn natural_key(&self) -> String;
}

impl DedupRow for PriceRecord {
    fn insert_if_absent(
        &self,
        session: &StoreSession,
        ingested_at: PrimitiveDateTime,
    ) -> Result<usize, WarehouseError> {
        session.insert_price_if_absent(self, ingested_at)
    }

    fn natural_key(&self) -> String {
        format!("{}/{} h{}", self.source, self.date, self.hour)
    }
}

impl DedupRow for NewsRecord {
    fn insert_if_absent(
        &self,
        session: &StoreSession,
        ingested_at: PrimitiveDateTime,
    ) -> Result<usize, WarehouseError> {
        session.insert_news_if_absent(self, ingested_at)
    }

    fn natural_key(&self) -> String {
        self.url.clone()
    }
}

/// Batch size by input volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizePolicy {
    pub small_limit: usize,
    pub small_batch: usize,
    pub medium_limit: usize,
    pub medium_batch: usize,
    pub large_batch: usize,
}

impl Default for BatchSizePolicy {
    fn default() -> Self {
        Self {
            small_limit: 500,
            small_batch: 100,
            medium_limit: 2_000,
            medium_batch: 200,
            large_batch: 500,
        }
    }
}

impl BatchSizePolicy {
    pub fn batch_size(&self, volume: usize) -> usize {
        let size = if volume < self.small_limit {
            self.small_batch
        } else if volume < self.medium_limit {
            self.medium_batch
        } else {
            self.large_batch
        };
        size.max(1)
    }
}

/// Outcome of one [`DedupWriter::insert`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub attempted: usize,
    /// Rows newly written; duplicates are not counted.
    pub inserted: u64,
    /// Rows that failed during the row-by-row fallback.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DedupWriter {
    policy: BatchSizePolicy,
}

impl DedupWriter {
    pub fn new(policy: BatchSizePolicy) -> Self {
        Self { policy }
    }

    /// Insert `rows`, skipping those whose natural key is already stored.
    ///
    /// Each batch runs in its own transaction. A failed batch is rolled back
    /// and replayed one row at a time; row failures are logged and counted,
    /// never raised. An error is returned only when the session cannot open
    /// or roll back a transaction.
    pub fn insert<R: DedupRow>(
        &self,
        session: &StoreSession,
        source: &str,
        rows: &[R],
        ingested_at: PrimitiveDateTime,
    ) -> Result<WriteReport, WarehouseError> {
        let mut report = WriteReport {
            attempted: rows.len(),
            ..WriteReport::default()
        };
        if rows.is_empty() {
            return Ok(report);
        }

        let batch_size = self.policy.batch_size(rows.len());
        for batch in rows.chunks(batch_size) {
            session.begin()?;
            let written = batch.iter().try_fold(0_u64, |total, row| {
                row.insert_if_absent(session, ingested_at)
                    .map(|count| total + count as u64)
            });
            let failure = match written {
                Ok(count) => match session.commit() {
                    Ok(()) => {
                        report.inserted += count;
                        continue;
                    }
                    Err(commit_error) => commit_error,
                },
                Err(batch_error) => batch_error,
            };

            warn!(
                source,
                batch_rows = batch.len(),
                error = %failure,
                "batch insert failed; falling back to row-by-row"
            );
            if session.in_transaction() {
                session.rollback()?;
            }
            let (inserted, failed) = insert_row_by_row(session, source, batch, ingested_at);
            report.inserted += inserted;
            report.failed += failed;
        }

        debug!(
            source,
            attempted = report.attempted,
            inserted = report.inserted,
            failed = report.failed,
            batch_size,
            "dedup insert finished"
        );
        Ok(report)
    }
}

fn insert_row_by_row<R: DedupRow>(
    session: &StoreSession,
    source: &str,
    rows: &[R],
    ingested_at: PrimitiveDateTime,
) -> (u64, usize) {
    let mut inserted = 0_u64;
    let mut failed = 0_usize;
    for row in rows {
        match row.insert_if_absent(session, ingested_at) {
            Ok(count) => inserted += count as u64,
            Err(row_error) => {
                failed += 1;
                error!(
                    source,
                    key = %row.natural_key(),
                    error = %row_error,
                    "row insert failed"
                );
            }
        }
    }
    (inserted, failed)
}
