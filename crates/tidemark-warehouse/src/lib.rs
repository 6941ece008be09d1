//! # Tidemark Warehouse
//!
//! DuckDB-backed relational store for the tidemark ingestion engine.
//!
//! ## Overview
//!
//! The warehouse owns the schema and every statement the engine issues. Workers
//! never share a connection: each one opens a [`StoreSession`] that holds a
//! pooled connection for its lifetime and hands it back when dropped.
//!
//! ```rust,no_run
//! use tidemark_warehouse::{Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!     warehouse.ping()?;
//!
//!     let session = warehouse.session()?;
//!     let resume_from = session.read_watermark("BTC-USD")?;
//!     println!("BTC-USD resumes after {resume_from:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `crypto_price` | Hourly OHLCV facts, natural key `(price_date, hour, source)` |
//! | `crypto_news` | News articles, natural key `url` |
//! | `ingestion_watermark` | Resume point per source |
//! | `ingestion_log` | Append-only run audit trail |
//! | `data_quality_issue` | Non-blocking quality findings |
//! | `crypto_price_staging` | Scratch table for the one-shot bulk load |
//!
//! All values reach the database as statement parameters.

pub mod duckdb;
pub mod export;
pub mod migrations;
pub mod records;
pub mod session;
pub mod sqltime;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::ToSql;
use thiserror::Error;
use time::PrimitiveDateTime;
use tracing::{debug, info};

pub use ::duckdb::types::Value as SqlValue;
pub use duckdb::{DbLocation, DuckDbConnectionManager, PooledConnection};
pub use export::{export_parquet, ExportColumn};
pub use records::{
    IngestStatus, IngestionLogEntry, NewsRecord, PriceRecord, QualityIssueRecord, WatermarkRecord,
};
pub use session::StoreSession;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A value could not be converted to or from its stored text form.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A pool lock was poisoned by a panicking holder.
    #[error("connection pool lock poisoned")]
    PoolPoisoned,
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for tidemark data.
    pub tidemark_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let tidemark_home = resolve_tidemark_home();
        let db_path = tidemark_home.join("warehouse.duckdb");
        Self {
            tidemark_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// The store shared by every worker of a run.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open (or create) the database file and apply pending migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(
            DbLocation::File(config.db_path.clone()),
            config.max_pool_size,
        )?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        info!(db_path = %config.db_path.display(), "warehouse opened");
        Ok(warehouse)
    }

    /// Open a private in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let manager = DuckDbConnectionManager::open(DbLocation::Memory, 4)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        debug!("schema migrations applied");
        Ok(())
    }

    /// Connection precheck: acquire a connection and run a trivial query.
    pub fn ping(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let _: i32 = connection.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }

    /// Acquire a scoped session holding one pooled connection.
    pub fn session(&self) -> Result<StoreSession, WarehouseError> {
        Ok(StoreSession::new(self.manager.acquire()?))
    }

    /// Get the path to the database file, if it lives on disk.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.manager.db_path()
    }

    /// One-shot historical load through the staging table.
    ///
    /// Rows are staged, every natural key not yet present in `crypto_price` is
    /// moved over with a single statement (first staged row wins for repeated
    /// keys), and the staging table is emptied. The watermark is not touched.
    /// Returns the number of rows moved.
    pub fn bulk_load_prices(
        &self,
        rows: &[PriceRecord],
        ingested_at: PrimitiveDateTime,
    ) -> Result<u64, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire()?;
        let ingested_at = sqltime::format_timestamp(ingested_at)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<u64, WarehouseError> {
            connection.execute_batch("DELETE FROM crypto_price_staging")?;
            for row in rows {
                let date = sqltime::format_date(row.date)?;
                let hour = i32::from(row.hour);
                let params: [&dyn ToSql; 9] = [
                    &date,
                    &hour,
                    &row.source,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.volume,
                    &ingested_at,
                ];
                connection.execute(
                    "INSERT INTO crypto_price_staging \
                     (price_date, hour, source, open, high, low, close, volume, ingested_at) \
                     VALUES (CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
                    params.as_slice(),
                )?;
            }

            let moved = connection.execute(
                "INSERT INTO crypto_price \
                 (price_date, hour, source, open, high, low, close, volume, ingested_at) \
                 SELECT s.price_date, s.hour, s.source, s.open, s.high, s.low, s.close, s.volume, s.ingested_at \
                 FROM (SELECT DISTINCT ON (price_date, hour, source) * FROM crypto_price_staging) AS s \
                 WHERE NOT EXISTS ( \
                     SELECT 1 FROM crypto_price AS p \
                     WHERE p.price_date = s.price_date AND p.hour = s.hour AND p.source = s.source \
                 )",
                [],
            )?;
            connection.execute_batch("DELETE FROM crypto_price_staging")?;
            Ok(moved as u64)
        })();

        let moved = finalize_transaction(&connection, result)?;
        info!(staged = rows.len(), moved, "bulk load finished");
        Ok(moved)
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &::duckdb::Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Resolve the tidemark home directory from environment or default.
pub fn resolve_tidemark_home() -> PathBuf {
    if let Some(path) = env::var_os("TIDEMARK_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tidemark");
    }

    PathBuf::from(".tidemark")
}

/// Convert a path to a SQL-compatible string (forward slashes).
pub(crate) fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Escape a string for inclusion in a SQL literal.
///
/// Only used for file paths the process builds itself; everything else is
/// bound as a parameter.
pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}
