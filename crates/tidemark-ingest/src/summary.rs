//! Run-level aggregation of source outcomes.

use std::fmt::Write as _;
use std::time::Duration;

use time::PrimitiveDateTime;
use tidemark_warehouse::{IngestStatus, IngestionLogEntry, Warehouse};
use tracing::{error, info};
use uuid::Uuid;

use crate::ingestor::{SourceOutcome, SourceStatus};

/// Totals for one run of one entity (`CRYPTO`, `NEWS`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub entity: String,
    pub success: usize,
    pub warning: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows: u64,
    pub started_at: PrimitiveDateTime,
    pub finished_at: PrimitiveDateTime,
    pub duration: Duration,
    /// Outcomes sorted by source.
    pub outcomes: Vec<SourceOutcome>,
}

impl RunSummary {
    /// Reduce `outcomes` (in any order, possibly empty).
    pub fn from_outcomes(
        entity: impl Into<String>,
        mut outcomes: Vec<SourceOutcome>,
        started_at: PrimitiveDateTime,
        finished_at: PrimitiveDateTime,
        duration: Duration,
    ) -> Self {
        outcomes.sort_by(|left, right| left.source.cmp(&right.source));
        let count = |status: SourceStatus| {
            outcomes
                .iter()
                .filter(|outcome| outcome.status == status)
                .count()
        };

        Self {
            run_id: Uuid::new_v4(),
            entity: entity.into().to_ascii_uppercase(),
            success: count(SourceStatus::Success),
            warning: count(SourceStatus::Warning),
            failed: count(SourceStatus::Failed),
            skipped: count(SourceStatus::Skipped),
            rows: outcomes.iter().map(|outcome| outcome.rows).sum(),
            started_at,
            finished_at,
            duration,
            outcomes,
        }
    }

    /// One-line totals, as stored in the SUMMARY log entry.
    pub fn message(&self) -> String {
        format!(
            "success={} warning={} failed={} skipped={} rows={} duration_ms={} run_id={}",
            self.success,
            self.warning,
            self.failed,
            self.skipped,
            self.rows,
            self.duration.as_millis(),
            self.run_id
        )
    }

    /// Fixed-width table of per-source results followed by totals.
    pub fn render_table(&self) -> String {
        let width = self
            .outcomes
            .iter()
            .map(|outcome| outcome.source.len())
            .max()
            .unwrap_or(0)
            .max("SOURCE".len());

        let mut table = String::new();
        let _ = writeln!(table, "{} run {}", self.entity, self.run_id);
        let _ = writeln!(
            table,
            "{:<width$}  {:<8}  {:>8}  {:>10}",
            "SOURCE", "STATUS", "ROWS", "ELAPSED_MS"
        );
        let _ = writeln!(table, "{}", "-".repeat(width + 34));
        for outcome in &self.outcomes {
            let _ = writeln!(
                table,
                "{:<width$}  {:<8}  {:>8}  {:>10}",
                outcome.source,
                outcome.status.as_str(),
                outcome.rows,
                outcome.elapsed.as_millis()
            );
        }
        let _ = writeln!(table, "{}", "-".repeat(width + 34));
        let _ = write!(table, "{}", self.message());
        table
    }

    /// Write the SUMMARY audit entry. Failures are logged, never returned.
    pub fn persist(&self, warehouse: &Warehouse) {
        let entry = IngestionLogEntry {
            source: self.entity.clone(),
            status: IngestStatus::Summary,
            message: self.message(),
            rows_inserted: self.rows,
            started_at: self.started_at,
            finished_at: self.finished_at,
        };
        match warehouse
            .session()
            .and_then(|session| session.log_ingestion(&entry))
        {
            Ok(()) => info!(entity = %self.entity, run_id = %self.run_id, "run summary written"),
            Err(persist_error) => {
                error!(entity = %self.entity, error = %persist_error, "failed to write run summary");
            }
        }
    }
}
