mod all;
mod bulk_load;
mod crypto;
mod news;
mod status;

use std::sync::Arc;
use std::time::Instant;

use tidemark_core::{
    HttpClient, LocalArchiver, NewsApiAdapter, PriceProvider, ReqwestHttpClient, RetryExecutor,
    SourceId, TargetClock, YahooChartAdapter,
};
use tidemark_ingest::{
    BatchPlanner, CoinTagger, IngestConfig, Ingestor, NewsIngestor, NewsQuery, Orchestrator,
    PriceIngestor, QualityValidator, RunContext, RunSummary, SourceOutcome, WatermarkStore,
};
use tidemark_warehouse::Warehouse;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Run the selected command and return the text to print.
pub async fn run(cli: &Cli) -> Result<String, CliError> {
    let config = IngestConfig::load(cli.config.as_deref())?;
    match &cli.command {
        Command::Crypto(args) => crypto::run(config, args).await,
        Command::News(args) => news::run(config, args).await,
        Command::All => all::run(config).await,
        Command::BulkLoad(args) => bulk_load::run(config, args).await,
        Command::Status(args) => status::run(config, args),
    }
}

/// Collaborators built once per invocation from the loaded config.
pub(crate) struct Engine {
    pub config: IngestConfig,
    pub clock: TargetClock,
    pub warehouse: Warehouse,
    http: Arc<dyn HttpClient>,
}

impl Engine {
    /// Open the store. A store that cannot be opened is a precheck failure.
    pub fn open(config: IngestConfig) -> Result<Self, CliError> {
        let clock = config.clock()?;
        let warehouse = Warehouse::open(config.warehouse_config()).map_err(CliError::Precheck)?;
        Ok(Self {
            config,
            clock,
            warehouse,
            http: Arc::new(ReqwestHttpClient::new()),
        })
    }

    pub fn context(&self) -> Arc<RunContext> {
        let archiver = Arc::new(LocalArchiver::new(
            self.config.archive_root(),
            self.config.archive.format,
        ));
        Arc::new(RunContext::new(
            self.warehouse.clone(),
            self.clock,
            RetryExecutor::new(self.config.retry_policy()),
            archiver,
        ))
    }

    pub fn price_provider(&self) -> Arc<dyn PriceProvider> {
        Arc::new(YahooChartAdapter::new(Arc::clone(&self.http)))
    }

    pub fn price_ingestors(&self, symbols: &[SourceId]) -> Result<Vec<Arc<dyn Ingestor>>, CliError> {
        let provider = self.price_provider();
        let planner = BatchPlanner::new(self.config.crypto.interval, self.config.batch_span());
        let watermarks = Arc::new(WatermarkStore::for_prices(self.config.epoch()?));
        let validator = Arc::new(QualityValidator::default());

        Ok(symbols
            .iter()
            .map(|symbol| {
                Arc::new(PriceIngestor::new(
                    symbol.clone(),
                    Arc::clone(&provider),
                    self.config.crypto.interval,
                    planner,
                    Arc::clone(&watermarks),
                    Arc::clone(&validator),
                )) as Arc<dyn Ingestor>
            })
            .collect())
    }

    pub fn news_ingestor(&self, query: Option<&str>) -> Result<Arc<dyn Ingestor>, CliError> {
        let news = &self.config.news;
        let provider = NewsApiAdapter::new(
            Arc::clone(&self.http),
            news.api_key.clone().unwrap_or_default(),
        );
        let query = NewsQuery {
            query: query.map_or_else(|| news.query.clone(), str::to_owned),
            lookback_days: news.lookback_days,
            page_size: news.page_size,
        };
        Ok(Arc::new(NewsIngestor::new(
            self.config.news_source()?,
            Arc::new(provider),
            query,
            Arc::new(CoinTagger::default()),
            Arc::new(WatermarkStore::for_news(self.config.epoch()?)),
        )))
    }

    /// One orchestrated run over `ingestors`.
    pub async fn orchestrate(&self, ingestors: Vec<Arc<dyn Ingestor>>) -> Result<RunOutcomes, CliError> {
        let context = self.context();
        let timer = Instant::now();
        let started_at = self.clock.now();
        let outcomes = Orchestrator::new(self.config.pool)
            .run(context, ingestors)
            .await?;
        Ok(RunOutcomes {
            outcomes,
            started_at,
            finished_at: self.clock.now(),
            elapsed: timer.elapsed(),
        })
    }
}

pub(crate) struct RunOutcomes {
    pub outcomes: Vec<SourceOutcome>,
    pub started_at: time::PrimitiveDateTime,
    pub finished_at: time::PrimitiveDateTime,
    pub elapsed: std::time::Duration,
}

impl RunOutcomes {
    /// Summarize `outcomes` as `entity`, persist the SUMMARY entry and
    /// return the rendered table.
    pub fn summarize(
        &self,
        warehouse: &Warehouse,
        entity: &str,
        outcomes: Vec<SourceOutcome>,
    ) -> String {
        let summary = RunSummary::from_outcomes(
            entity,
            outcomes,
            self.started_at,
            self.finished_at,
            self.elapsed,
        );
        summary.persist(warehouse);
        summary.render_table()
    }
}

/// `--symbols` when given, otherwise the configured list.
pub(crate) fn resolve_symbols(
    config: &IngestConfig,
    overrides: &[String],
) -> Result<Vec<SourceId>, CliError> {
    if overrides.is_empty() {
        return Ok(config.symbols()?);
    }
    overrides
        .iter()
        .map(|symbol| SourceId::parse(symbol).map_err(CliError::from))
        .collect()
}
