//! Text encoding of dates and timestamps exchanged with `DuckDB`.
//!
//! Values are bound as text and cast in SQL (`CAST(? AS TIMESTAMP)`), and read
//! back with `CAST(... AS VARCHAR)`, so the store never applies a session
//! time zone to the naive wall-clock values the engine works with.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use crate::WarehouseError;

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const TIMESTAMP_PARSE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Render a timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(value: PrimitiveDateTime) -> Result<String, WarehouseError> {
    value
        .format(TIMESTAMP_FORMAT)
        .map_err(|error| WarehouseError::Encoding(error.to_string()))
}

/// Parse a timestamp rendered by `DuckDB`, with or without fractional seconds.
pub fn parse_timestamp(value: &str) -> Result<PrimitiveDateTime, WarehouseError> {
    PrimitiveDateTime::parse(value.trim(), TIMESTAMP_PARSE_FORMAT).map_err(|error| {
        WarehouseError::Encoding(format!("invalid timestamp '{value}': {error}"))
    })
}

/// Render a date as `YYYY-MM-DD`.
pub fn format_date(value: Date) -> Result<String, WarehouseError> {
    value
        .format(DATE_FORMAT)
        .map_err(|error| WarehouseError::Encoding(error.to_string()))
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<Date, WarehouseError> {
    Date::parse(value.trim(), DATE_FORMAT)
        .map_err(|error| WarehouseError::Encoding(format!("invalid date '{value}': {error}")))
}
