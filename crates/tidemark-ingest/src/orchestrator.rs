//! Bounded fan-out of source runs.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use tidemark_warehouse::{IngestStatus, IngestionLogEntry};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{ConfigError, RunError};
use crate::ingestor::{Ingestor, RunContext, SourceOutcome, SourceStatus};

/// Worker count by number of sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerPoolPolicy {
    pub small_max_sources: usize,
    pub small_workers: usize,
    pub medium_max_sources: usize,
    pub medium_workers: usize,
    pub large_workers: usize,
}

impl Default for WorkerPoolPolicy {
    fn default() -> Self {
        Self {
            small_max_sources: 5,
            small_workers: 2,
            medium_max_sources: 10,
            medium_workers: 3,
            large_workers: 4,
        }
    }
}

impl WorkerPoolPolicy {
    /// Workers for `sources` runs: never more than the runs, never zero.
    pub fn size(&self, sources: usize) -> usize {
        let tier = if sources <= self.small_max_sources {
            self.small_workers
        } else if sources <= self.medium_max_sources {
            self.medium_workers
        } else {
            self.large_workers
        };
        tier.min(sources).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.small_workers == 0 || self.medium_workers == 0 || self.large_workers == 0 {
            return Err(ConfigError::Invalid(String::from(
                "pool worker counts must be greater than zero",
            )));
        }
        if self.small_max_sources > self.medium_max_sources {
            return Err(ConfigError::Invalid(String::from(
                "pool.small_max_sources must not exceed pool.medium_max_sources",
            )));
        }
        Ok(())
    }
}

/// Runs one ingestor per source under a bounded worker pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Orchestrator {
    pool: WorkerPoolPolicy,
}

impl Orchestrator {
    pub fn new(pool: WorkerPoolPolicy) -> Self {
        Self { pool }
    }

    /// Precheck the store, then run every ingestor and wait for all of them.
    ///
    /// Outcomes arrive in completion order, one per ingestor. A run that
    /// panics or whose task is lost is reported as FAILED for its source and
    /// logged to the audit table; siblings keep running.
    pub async fn run(
        &self,
        context: Arc<RunContext>,
        ingestors: Vec<Arc<dyn Ingestor>>,
    ) -> Result<Vec<SourceOutcome>, RunError> {
        if let Err(precheck) = context.warehouse.ping() {
            error!(error = %precheck, "store precheck failed; no source will run");
            return Err(RunError::Precheck(precheck));
        }

        let workers = self.pool.size(ingestors.len());
        info!(sources = ingestors.len(), workers, ceiling = %context.ceiling, "starting run");

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::with_capacity(ingestors.len());
        for ingestor in ingestors {
            let source = ingestor.source().as_str().to_owned();
            let started_at = context.clock.now();
            let task = {
                let context = Arc::clone(&context);
                let semaphore = Arc::clone(&semaphore);
                let source = source.clone();
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return failed(&context, source, started_at, "worker pool closed");
                    };
                    let started_at = context.clock.now();
                    let timer = Instant::now();
                    match AssertUnwindSafe(ingestor.run(&context)).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            error!(source = %source, panic = %message, "source run panicked");
                            failed(&context, source, started_at, format!("panicked: {message}"))
                                .with_elapsed(timer.elapsed())
                        }
                    }
                }
            };
            let handle = tasks.spawn(task);
            spawned.insert(handle.id(), (source, started_at));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(join_error) => {
                    error!(error = %join_error, "source task did not complete");
                    if let Some((source, started_at)) = spawned.remove(&join_error.id()) {
                        let message = format!("task did not complete: {join_error}");
                        outcomes.push(failed(&context, source, started_at, message));
                    }
                }
            }
        }
        Ok(outcomes)
    }
}

/// FAILED outcome for a run that ended outside the ingestor, written to the
/// audit log like any other failure.
fn failed(
    context: &RunContext,
    source: String,
    started_at: PrimitiveDateTime,
    message: impl Into<String>,
) -> SourceOutcome {
    let message = message.into();
    context.log_best_effort(&IngestionLogEntry {
        source: source.clone(),
        status: IngestStatus::Failed,
        message: message.clone(),
        rows_inserted: 0,
        started_at,
        finished_at: context.clock.now(),
    });
    SourceOutcome::new(source, SourceStatus::Failed, 0, message)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}
