use std::fmt::Write as _;

use serde_json::json;
use tidemark_ingest::IngestConfig;
use tidemark_warehouse::sqltime::format_timestamp;
use tidemark_warehouse::{IngestionLogEntry, WatermarkRecord};

use super::Engine;
use crate::cli::StatusArgs;
use crate::error::CliError;

pub fn run(config: IngestConfig, args: &StatusArgs) -> Result<String, CliError> {
    let engine = Engine::open(config)?;
    let session = engine.warehouse.session()?;
    let watermarks = session.list_watermarks()?;
    let source = args.source.as_deref().map(str::to_ascii_uppercase);
    let entries = session.recent_log_entries(source.as_deref(), args.limit)?;

    if args.json {
        render_json(&watermarks, &entries)
    } else {
        render_text(&watermarks, &entries)
    }
}

fn render_json(
    watermarks: &[WatermarkRecord],
    entries: &[IngestionLogEntry],
) -> Result<String, CliError> {
    let watermarks = watermarks
        .iter()
        .map(|watermark| {
            Ok(json!({
                "source": watermark.source,
                "last_success": format_timestamp(watermark.last_success)?,
                "updated_at": format_timestamp(watermark.updated_at)?,
            }))
        })
        .collect::<Result<Vec<_>, CliError>>()?;
    let entries = entries
        .iter()
        .map(|entry| {
            Ok(json!({
                "source": entry.source,
                "status": entry.status.as_str(),
                "message": entry.message,
                "rows_inserted": entry.rows_inserted,
                "started_at": format_timestamp(entry.started_at)?,
                "finished_at": format_timestamp(entry.finished_at)?,
            }))
        })
        .collect::<Result<Vec<_>, CliError>>()?;

    Ok(serde_json::to_string_pretty(&json!({
        "watermarks": watermarks,
        "recent_runs": entries,
    }))?)
}

fn render_text(
    watermarks: &[WatermarkRecord],
    entries: &[IngestionLogEntry],
) -> Result<String, CliError> {
    let mut out = String::from("WATERMARKS\n");
    if watermarks.is_empty() {
        out.push_str("  (none)\n");
    }
    for watermark in watermarks {
        let _ = writeln!(
            out,
            "  {:<12} {}  (updated {})",
            watermark.source,
            format_timestamp(watermark.last_success)?,
            format_timestamp(watermark.updated_at)?
        );
    }

    out.push_str("\nRECENT RUNS\n");
    if entries.is_empty() {
        out.push_str("  (none)\n");
    }
    for entry in entries {
        let _ = writeln!(
            out,
            "  {}  {:<12} {:<8} rows={:<6} {}",
            format_timestamp(entry.finished_at)?,
            entry.source,
            entry.status.as_str(),
            entry.rows_inserted,
            entry.message
        );
    }
    Ok(out.trim_end().to_owned())
}
