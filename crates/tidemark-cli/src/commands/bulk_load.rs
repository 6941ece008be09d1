use std::fmt::Write as _;

use tidemark_ingest::{BulkLoader, IngestConfig};
use tidemark_warehouse::sqltime::parse_date;
use tracing::{error, info};

use super::{resolve_symbols, Engine};
use crate::cli::BulkLoadArgs;
use crate::error::CliError;

pub async fn run(config: IngestConfig, args: &BulkLoadArgs) -> Result<String, CliError> {
    let start = parse_date(&args.start).map_err(|error| CliError::Argument(error.to_string()))?;
    let end = parse_date(&args.end).map_err(|error| CliError::Argument(error.to_string()))?;
    if start > end {
        return Err(CliError::Argument(format!(
            "--start {start} is after --end {end}"
        )));
    }
    let symbols = resolve_symbols(&config, &args.symbols)?;

    let engine = Engine::open(config)?;
    engine.warehouse.ping().map_err(CliError::Precheck)?;
    let context = engine.context();
    let loader = BulkLoader::new(engine.price_provider(), engine.config.crypto.interval)
        .with_archive(!args.no_archive);
    info!(start = %start, end = %end, symbols = symbols.len(), "starting bulk load");

    let mut report = format!("bulk load {start} .. {end}\n");
    let mut total = 0_u64;
    for symbol in &symbols {
        match loader.load(&context, symbol, start, end).await {
            Ok(loaded) => {
                total += loaded.loaded;
                let _ = writeln!(
                    report,
                    "{symbol:<12} fetched={} loaded={} chunks={}",
                    loaded.fetched, loaded.loaded, loaded.chunks
                );
            }
            Err(load_error) => {
                error!(source = %symbol, error = %load_error, "bulk load failed");
                let _ = writeln!(report, "{symbol:<12} FAILED {load_error}");
            }
        }
    }
    let _ = write!(report, "total loaded={total}");
    Ok(report)
}
