use tidemark_ingest::IngestConfig;
use tracing::{info, warn};

use super::Engine;
use crate::cli::NewsArgs;
use crate::error::CliError;

pub async fn run(config: IngestConfig, args: &NewsArgs) -> Result<String, CliError> {
    if config.news.api_key.is_none() {
        warn!(env = %config.news.api_key_env, "news API key is not set; the news source will fail");
    }
    let engine = Engine::open(config)?;
    info!("starting news run");

    let ingestor = engine.news_ingestor(args.query.as_deref())?;
    let run = engine.orchestrate(vec![ingestor]).await?;
    Ok(run.summarize(&engine.warehouse, "NEWS", run.outcomes.clone()))
}
