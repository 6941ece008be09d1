//! Raw-batch archival.
//!
//! Every fetched batch is archived before it is written to the warehouse, so
//! a batch whose relational write fails can be replayed from disk. The local
//! layout is Hive-style:
//!
//! ```text
//! <root>/source=<provider>/dataset=<dataset>/symbol=<source>/date=<YYYY-MM-DD>/<label>_<YYYYMMDD_HHMMSS>.parquet
//! ```
//!
//! Parquet is the default format. When the Parquet write fails the archiver
//! falls back to newline-delimited JSON in the same directory.
//!
//! An archived file is never replaced: a batch whose name is already taken
//! is written as `<label>_<stamp>_<n>` with the first free `n`.

use std::fmt::{Display, Formatter};
use std::fs;
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::macros::format_description;
use time::PrimitiveDateTime;
use tidemark_warehouse::sqltime::{format_date, format_timestamp};
use tidemark_warehouse::{
    export_parquet, ExportColumn, NewsRecord, PriceRecord, SqlValue, WarehouseError,
};
use tracing::{debug, warn};

/// Errors raised while archiving a batch.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet write failed: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("ndjson encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("archive encoding failed: {0}")]
    Encoding(String),

    #[error("archive task failed: {0}")]
    Task(String),
}

/// A row type that can be archived: a fixed column schema plus its values.
pub trait ArchiveRecord {
    fn columns() -> &'static [ExportColumn];

    /// Values in [`ArchiveRecord::columns`] order.
    fn values(&self) -> Result<Vec<SqlValue>, ArchiveError>;
}

const PRICE_COLUMNS: &[ExportColumn] = &[
    ExportColumn::new("price_date", "DATE"),
    ExportColumn::new("hour", "INTEGER"),
    ExportColumn::new("source", "VARCHAR"),
    ExportColumn::new("open", "DOUBLE"),
    ExportColumn::new("high", "DOUBLE"),
    ExportColumn::new("low", "DOUBLE"),
    ExportColumn::new("close", "DOUBLE"),
    ExportColumn::new("volume", "BIGINT"),
];

const NEWS_COLUMNS: &[ExportColumn] = &[
    ExportColumn::new("coin_tag", "VARCHAR"),
    ExportColumn::new("title", "VARCHAR"),
    ExportColumn::new("description", "VARCHAR"),
    ExportColumn::new("content", "VARCHAR"),
    ExportColumn::new("published_at", "TIMESTAMP"),
    ExportColumn::new("news_date", "DATE"),
    ExportColumn::new("source_name", "VARCHAR"),
    ExportColumn::new("url", "VARCHAR"),
];

impl ArchiveRecord for PriceRecord {
    fn columns() -> &'static [ExportColumn] {
        PRICE_COLUMNS
    }

    fn values(&self) -> Result<Vec<SqlValue>, ArchiveError> {
        Ok(vec![
            SqlValue::Text(format_date(self.date)?),
            SqlValue::Int(i32::from(self.hour)),
            SqlValue::Text(self.source.clone()),
            optional_double(self.open),
            optional_double(self.high),
            optional_double(self.low),
            optional_double(self.close),
            self.volume.map_or(SqlValue::Null, SqlValue::BigInt),
        ])
    }
}

impl ArchiveRecord for NewsRecord {
    fn columns() -> &'static [ExportColumn] {
        NEWS_COLUMNS
    }

    fn values(&self) -> Result<Vec<SqlValue>, ArchiveError> {
        Ok(vec![
            SqlValue::Text(self.coin_tag.clone()),
            optional_text(self.title.as_deref()),
            optional_text(self.description.as_deref()),
            optional_text(self.content.as_deref()),
            SqlValue::Text(format_timestamp(self.published_at)?),
            SqlValue::Text(format_date(self.news_date)?),
            optional_text(self.source_name.as_deref()),
            SqlValue::Text(self.url.clone()),
        ])
    }
}

fn optional_double(value: Option<f64>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Double)
}

fn optional_text(value: Option<&str>) -> SqlValue {
    value.map_or(SqlValue::Null, |text| SqlValue::Text(text.to_owned()))
}

/// On-disk archive format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Parquet,
    Ndjson,
}

impl ArchiveFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Ndjson => "ndjson",
        }
    }
}

impl Display for ArchiveFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "parquet" => Ok(Self::Parquet),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            other => Err(format!("unknown archive format '{other}'")),
        }
    }
}

/// A type-erased batch ready to be archived.
#[derive(Debug, Clone)]
pub struct ArchiveBatch {
    /// Provider name, e.g. `yahoo`.
    pub provider: String,
    /// Dataset name, e.g. `crypto_price`.
    pub dataset: String,
    /// Source identifier the rows belong to.
    pub source: String,
    /// File-name label, e.g. `incremental` or `bulk`.
    pub label: String,
    /// Batch timestamp; selects the date partition and the file name.
    pub batch_ts: PrimitiveDateTime,
    pub columns: &'static [ExportColumn],
    pub rows: Vec<Vec<SqlValue>>,
}

impl ArchiveBatch {
    pub fn from_records<R: ArchiveRecord>(
        provider: impl Into<String>,
        dataset: impl Into<String>,
        source: impl Into<String>,
        label: impl Into<String>,
        batch_ts: PrimitiveDateTime,
        records: &[R],
    ) -> Result<Self, ArchiveError> {
        let rows = records
            .iter()
            .map(ArchiveRecord::values)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            provider: provider.into(),
            dataset: dataset.into(),
            source: source.into(),
            label: label.into(),
            batch_ts,
            columns: R::columns(),
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Where an archived batch ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    pub path: PathBuf,
    pub rows: u64,
    pub format: ArchiveFormat,
}

/// Durable raw-batch storage.
pub trait RawArchiver: Send + Sync {
    fn archive<'a>(
        &'a self,
        batch: &'a ArchiveBatch,
    ) -> Pin<Box<dyn Future<Output = Result<ArchiveHandle, ArchiveError>> + Send + 'a>>;
}

/// Archiver writing partitioned files under a local root directory.
#[derive(Debug, Clone)]
pub struct LocalArchiver {
    root: PathBuf,
    format: ArchiveFormat,
}

impl LocalArchiver {
    pub fn new(root: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub const fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Path a batch is written to in the given format.
    pub fn partition_path(
        &self,
        batch: &ArchiveBatch,
        format: ArchiveFormat,
    ) -> Result<PathBuf, ArchiveError> {
        let date = format_date(batch.batch_ts.date())?;
        let stamp = batch
            .batch_ts
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .map_err(|error| ArchiveError::Encoding(error.to_string()))?;

        Ok(self
            .root
            .join(format!("source={}", batch.provider))
            .join(format!("dataset={}", batch.dataset))
            .join(format!("symbol={}", batch.source))
            .join(format!("date={date}"))
            .join(format!("{}_{stamp}.{}", batch.label, format.extension())))
    }

    fn write_blocking(&self, batch: &ArchiveBatch) -> Result<ArchiveHandle, ArchiveError> {
        if self.format == ArchiveFormat::Parquet {
            let path = vacant_path(self.partition_path(batch, ArchiveFormat::Parquet)?);
            match export_parquet(&path, batch.columns, &batch.rows) {
                Ok(rows) => {
                    return Ok(ArchiveHandle {
                        path,
                        rows,
                        format: ArchiveFormat::Parquet,
                    })
                }
                Err(error) => {
                    warn!(
                        source = %batch.source,
                        dataset = %batch.dataset,
                        error = %error,
                        "parquet archive failed; falling back to ndjson"
                    );
                    // A half-written file would shadow the fallback on replay.
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let path = vacant_path(self.partition_path(batch, ArchiveFormat::Ndjson)?);
        let rows = write_ndjson(&path, batch)?;
        Ok(ArchiveHandle {
            path,
            rows,
            format: ArchiveFormat::Ndjson,
        })
    }
}

impl RawArchiver for LocalArchiver {
    fn archive<'a>(
        &'a self,
        batch: &'a ArchiveBatch,
    ) -> Pin<Box<dyn Future<Output = Result<ArchiveHandle, ArchiveError>> + Send + 'a>> {
        Box::pin(async move {
            let archiver = self.clone();
            let owned = batch.clone();
            let handle = tokio::task::spawn_blocking(move || archiver.write_blocking(&owned))
                .await
                .map_err(|error| ArchiveError::Task(error.to_string()))??;
            debug!(
                path = %handle.path.display(),
                rows = handle.rows,
                format = %handle.format,
                "batch archived"
            );
            Ok(handle)
        })
    }
}

/// `path` itself, or the first numbered sibling that does not exist yet.
fn vacant_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut attempt = 1_u32;
    loop {
        let candidate = path.with_file_name(format!("{stem}_{attempt}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}

fn write_ndjson(path: &Path, batch: &ArchiveBatch) -> Result<u64, ArchiveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for row in &batch.rows {
        if row.len() != batch.columns.len() {
            return Err(ArchiveError::Encoding(format!(
                "row has {} values, expected {}",
                row.len(),
                batch.columns.len()
            )));
        }
        let object = batch
            .columns
            .iter()
            .zip(row)
            .map(|(column, value)| (column.name.to_owned(), json_value(value)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::to_writer(&mut writer, &object)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(batch.rows.len() as u64)
}

fn json_value(value: &SqlValue) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        SqlValue::Null => Json::Null,
        SqlValue::Boolean(flag) => Json::Bool(*flag),
        SqlValue::Int(number) => Json::from(*number),
        SqlValue::BigInt(number) => Json::from(*number),
        SqlValue::Double(number) => serde_json::Number::from_f64(*number)
            .map_or(Json::Null, Json::Number),
        SqlValue::Text(text) => Json::String(text.clone()),
        other => Json::String(format!("{other:?}")),
    }
}
