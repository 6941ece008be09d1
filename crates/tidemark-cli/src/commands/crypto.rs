use tidemark_ingest::IngestConfig;
use tracing::info;

use super::{resolve_symbols, Engine};
use crate::cli::CryptoArgs;
use crate::error::CliError;

pub async fn run(config: IngestConfig, args: &CryptoArgs) -> Result<String, CliError> {
    let symbols = resolve_symbols(&config, &args.symbols)?;
    let engine = Engine::open(config)?;
    info!(symbols = symbols.len(), "starting crypto run");

    let run = engine.orchestrate(engine.price_ingestors(&symbols)?).await?;
    Ok(run.summarize(&engine.warehouse, "CRYPTO", run.outcomes.clone()))
}
