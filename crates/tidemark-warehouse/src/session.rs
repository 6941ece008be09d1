//! Scoped store access for one worker.
//!
//! A [`StoreSession`] owns one pooled connection for as long as a source run
//! needs it; the connection goes back to the pool when the session drops, on
//! every exit path.

use std::cell::Cell;

use ::duckdb::ToSql;
use time::PrimitiveDateTime;

use crate::duckdb::PooledConnection;
use crate::records::{
    IngestStatus, IngestionLogEntry, NewsRecord, PriceRecord, QualityIssueRecord, WatermarkRecord,
};
use crate::sqltime::{format_date, format_timestamp, parse_timestamp};
use crate::WarehouseError;

/// One read-write connection with the statements the engine issues.
pub struct StoreSession {
    connection: PooledConnection,
    in_transaction: Cell<bool>,
}

impl StoreSession {
    pub(crate) fn new(connection: PooledConnection) -> Self {
        Self {
            connection,
            in_transaction: Cell::new(false),
        }
    }

    /// Stored watermark for `source`, if any.
    pub fn read_watermark(&self, source: &str) -> Result<Option<PrimitiveDateTime>, WarehouseError> {
        let params: [&dyn ToSql; 1] = [&source];
        let mut statement = self.connection.prepare(
            "SELECT CAST(last_success AS VARCHAR) FROM ingestion_watermark WHERE source = ?",
        )?;
        let mut rows = statement.query(params.as_slice())?;
        match rows.next()? {
            Some(row) => {
                let text: String = row.get(0)?;
                Ok(Some(parse_timestamp(&text)?))
            }
            None => Ok(None),
        }
    }

    /// Latest `(date + hour)` already present in the price table for `source`.
    pub fn max_price_timestamp(
        &self,
        source: &str,
    ) -> Result<Option<PrimitiveDateTime>, WarehouseError> {
        let params: [&dyn ToSql; 1] = [&source];
        let text: Option<String> = self.connection.query_row(
            "SELECT CAST(MAX(CAST(price_date AS TIMESTAMP) + to_hours(hour)) AS VARCHAR) \
             FROM crypto_price WHERE source = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        text.as_deref().map(parse_timestamp).transpose()
    }

    /// Move the watermark for `source` forward to `last_success`.
    ///
    /// Inserts the row when the source is unseen. An existing row is only
    /// updated when `last_success` is strictly newer, so stale or repeated
    /// calls leave it untouched. Returns whether the stored value changed.
    pub fn advance_watermark(
        &self,
        source: &str,
        last_success: PrimitiveDateTime,
        updated_at: PrimitiveDateTime,
    ) -> Result<bool, WarehouseError> {
        let previous = self.read_watermark(source)?;
        let advanced = previous.map_or(true, |previous| last_success > previous);
        let last_success = format_timestamp(last_success)?;
        let updated_at = format_timestamp(updated_at)?;
        let params: [&dyn ToSql; 3] = [&source, &last_success, &updated_at];
        self.connection.execute(
            "INSERT INTO ingestion_watermark (source, last_success, updated_at) \
             VALUES (?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP)) \
             ON CONFLICT (source) DO UPDATE SET \
                 last_success = excluded.last_success, \
                 updated_at = excluded.updated_at \
             WHERE excluded.last_success > ingestion_watermark.last_success",
            params.as_slice(),
        )?;
        Ok(advanced)
    }

    /// Every stored watermark, ordered by source.
    pub fn list_watermarks(&self) -> Result<Vec<WatermarkRecord>, WarehouseError> {
        let mut statement = self.connection.prepare(
            "SELECT source, CAST(last_success AS VARCHAR), CAST(updated_at AS VARCHAR) \
             FROM ingestion_watermark ORDER BY source",
        )?;
        let raw = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(source, last_success, updated_at)| {
                Ok(WatermarkRecord {
                    source,
                    last_success: parse_timestamp(&last_success)?,
                    updated_at: parse_timestamp(&updated_at)?,
                })
            })
            .collect()
    }

    /// Insert `row` unless a row with the same `(date, hour, source)` exists.
    ///
    /// The existence check is part of the statement itself. Returns the number
    /// of rows written (0 or 1).
    pub fn insert_price_if_absent(
        &self,
        row: &PriceRecord,
        ingested_at: PrimitiveDateTime,
    ) -> Result<usize, WarehouseError> {
        let date = format_date(row.date)?;
        let hour = i32::from(row.hour);
        let ingested_at = format_timestamp(ingested_at)?;
        let params: [&dyn ToSql; 12] = [
            &date,
            &hour,
            &row.source,
            &row.open,
            &row.high,
            &row.low,
            &row.close,
            &row.volume,
            &ingested_at,
            &date,
            &hour,
            &row.source,
        ];
        let inserted = self.connection.execute(
            "INSERT INTO crypto_price \
             (price_date, hour, source, open, high, low, close, volume, ingested_at) \
             SELECT CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP) \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM crypto_price \
                 WHERE price_date = CAST(? AS DATE) AND hour = ? AND source = ? \
             )",
            params.as_slice(),
        )?;
        Ok(inserted)
    }

    /// Insert `row` unless an article with the same `url` exists.
    pub fn insert_news_if_absent(
        &self,
        row: &NewsRecord,
        ingested_at: PrimitiveDateTime,
    ) -> Result<usize, WarehouseError> {
        let published_at = format_timestamp(row.published_at)?;
        let news_date = format_date(row.news_date)?;
        let ingested_at = format_timestamp(ingested_at)?;
        let params: [&dyn ToSql; 10] = [
            &row.coin_tag,
            &row.title,
            &row.description,
            &row.content,
            &published_at,
            &news_date,
            &row.source_name,
            &row.url,
            &ingested_at,
            &row.url,
        ];
        let inserted = self.connection.execute(
            "INSERT INTO crypto_news \
             (coin_tag, title, description, content, published_at, news_date, source_name, url, ingested_at) \
             SELECT ?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS DATE), ?, ?, CAST(? AS TIMESTAMP) \
             WHERE NOT EXISTS (SELECT 1 FROM crypto_news WHERE url = ?)",
            params.as_slice(),
        )?;
        Ok(inserted)
    }

    pub fn begin(&self) -> Result<(), WarehouseError> {
        self.connection.execute_batch("BEGIN TRANSACTION")?;
        self.in_transaction.set(true);
        Ok(())
    }

    /// Commit the open transaction. A failed COMMIT also ends it.
    pub fn commit(&self) -> Result<(), WarehouseError> {
        self.in_transaction.set(false);
        self.connection.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<(), WarehouseError> {
        self.in_transaction.set(false);
        self.connection.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Whether a transaction opened by [`Self::begin`] is still open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    /// Append one audit entry.
    pub fn log_ingestion(&self, entry: &IngestionLogEntry) -> Result<(), WarehouseError> {
        let status = entry.status.as_str();
        let rows_inserted = i64::try_from(entry.rows_inserted).unwrap_or(i64::MAX);
        let started_at = format_timestamp(entry.started_at)?;
        let finished_at = format_timestamp(entry.finished_at)?;
        let params: [&dyn ToSql; 6] = [
            &entry.source,
            &status,
            &entry.message,
            &rows_inserted,
            &started_at,
            &finished_at,
        ];
        self.connection.execute(
            "INSERT INTO ingestion_log \
             (source, status, message, rows_inserted, started_at, finished_at) \
             VALUES (?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP))",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Append one data-quality finding.
    pub fn log_quality_issue(&self, issue: &QualityIssueRecord) -> Result<(), WarehouseError> {
        let detected_at = format_timestamp(issue.detected_at)?;
        let params: [&dyn ToSql; 4] = [
            &issue.source,
            &issue.issue_type,
            &issue.issue_detail,
            &detected_at,
        ];
        self.connection.execute(
            "INSERT INTO data_quality_issue (source, issue_type, issue_detail, detected_at) \
             VALUES (?, ?, ?, CAST(? AS TIMESTAMP))",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Number of stored price rows for `source`.
    pub fn count_prices(&self, source: &str) -> Result<u64, WarehouseError> {
        let params: [&dyn ToSql; 1] = [&source];
        let count: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM crypto_price WHERE source = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Number of stored news articles.
    pub fn count_news(&self) -> Result<u64, WarehouseError> {
        let count: i64 =
            self.connection
                .query_row("SELECT COUNT(*) FROM crypto_news", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Number of recorded quality findings for `source`.
    pub fn count_quality_issues(&self, source: &str) -> Result<u64, WarehouseError> {
        let params: [&dyn ToSql; 1] = [&source];
        let count: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM data_quality_issue WHERE source = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Latest audit entries, newest first, optionally for one source only.
    pub fn recent_log_entries(
        &self,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<IngestionLogEntry>, WarehouseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let filter = if source.is_some() { "WHERE source = ?" } else { "" };
        let sql = format!(
            "SELECT source, status, COALESCE(message, ''), rows_inserted, \
                    CAST(started_at AS VARCHAR), CAST(finished_at AS VARCHAR) \
             FROM ingestion_log {filter} \
             ORDER BY finished_at DESC, started_at DESC \
             LIMIT ?"
        );
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(2);
        if let Some(source) = source.as_ref() {
            params.push(source);
        }
        params.push(&limit);

        let mut statement = self.connection.prepare(sql.as_str())?;
        let raw = statement
            .query_map(params.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(source, status, message, rows, started_at, finished_at)| {
                Ok(IngestionLogEntry {
                    source,
                    status: status
                        .parse::<IngestStatus>()
                        .map_err(WarehouseError::Encoding)?,
                    message,
                    rows_inserted: u64::try_from(rows).unwrap_or_default(),
                    started_at: parse_timestamp(&started_at)?,
                    finished_at: parse_timestamp(&finished_at)?,
                })
            })
            .collect()
    }
}
