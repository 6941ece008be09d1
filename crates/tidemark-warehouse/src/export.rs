//! Parquet export of arbitrary row sets.

use std::fs;
use std::path::Path;

use ::duckdb::types::Value;
use ::duckdb::{params_from_iter, Connection};

use crate::{escape_sql_string, path_to_sql, WarehouseError};

/// One output column: a name and the `DuckDB` type it is cast to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportColumn {
    pub name: &'static str,
    pub sql_type: &'static str,
}

impl ExportColumn {
    #[must_use]
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self { name, sql_type }
    }
}

/// Write `rows` to a Snappy-compressed Parquet file at `path`.
///
/// The rows are loaded into a throwaway in-memory database and written out
/// with `COPY ... TO`. Parent directories are created as needed. Returns the
/// number of rows written.
///
/// # Errors
/// Returns an error if a row does not match `columns` or the file cannot be
/// written.
pub fn export_parquet(
    path: &Path,
    columns: &[ExportColumn],
    rows: &[Vec<Value>],
) -> Result<u64, WarehouseError> {
    if columns.is_empty() {
        return Err(WarehouseError::Encoding(String::from(
            "parquet export needs at least one column",
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let connection = Connection::open_in_memory()?;
    let ddl = columns
        .iter()
        .map(|column| format!("\"{}\" {}", column.name, column.sql_type))
        .collect::<Vec<_>>()
        .join(", ");
    connection.execute_batch(format!("CREATE TABLE export_batch ({ddl})").as_str())?;

    let placeholders = columns
        .iter()
        .map(|column| format!("CAST(? AS {})", column.sql_type))
        .collect::<Vec<_>>()
        .join(", ");
    let mut insert =
        connection.prepare(format!("INSERT INTO export_batch VALUES ({placeholders})").as_str())?;
    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(WarehouseError::Encoding(format!(
                "row {index} has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
        insert.execute(params_from_iter(row.iter()))?;
    }

    let target = escape_sql_string(path_to_sql(path).as_str());
    connection.execute_batch(
        format!("COPY export_batch TO '{target}' (FORMAT PARQUET, COMPRESSION SNAPPY)").as_str(),
    )?;

    Ok(rows.len() as u64)
}
