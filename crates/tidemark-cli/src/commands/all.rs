use tidemark_ingest::IngestConfig;
use tracing::info;

use super::{resolve_symbols, Engine};
use crate::error::CliError;

/// Prices and news share one worker pool; each entity gets its own summary.
pub async fn run(config: IngestConfig) -> Result<String, CliError> {
    let symbols = resolve_symbols(&config, &[])?;
    let engine = Engine::open(config)?;
    let news_source = engine.config.news_source()?;

    let mut ingestors = engine.price_ingestors(&symbols)?;
    ingestors.push(engine.news_ingestor(None)?);
    info!(sources = ingestors.len(), "starting combined run");

    let run = engine.orchestrate(ingestors).await?;
    let (news, crypto): (Vec<_>, Vec<_>) = run
        .outcomes
        .iter()
        .cloned()
        .partition(|outcome| outcome.source == news_source.as_str());

    let crypto_table = run.summarize(&engine.warehouse, "CRYPTO", crypto);
    let news_table = run.summarize(&engine.warehouse, "NEWS", news);
    Ok(format!("{crypto_table}\n\n{news_table}"))
}
