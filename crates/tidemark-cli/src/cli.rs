//! Command-line arguments for `tidemark`.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crypto` | One incremental price run for every configured symbol |
//! | `news` | One incremental news run |
//! | `all` | Prices and news in a single orchestrated run |
//! | `bulk-load` | One-shot historical price load through the staging table |
//! | `status` | Watermarks and the latest audit entries |
//!
//! ```bash
//! tidemark crypto --symbols BTC-USD,ETH-USD
//! tidemark --log-format json all
//! tidemark bulk-load --start 2024-01-01 --end 2024-01-31
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Incremental crypto price and news ingestion.
#[derive(Debug, Parser)]
#[command(name = "tidemark", author, version, about = "Incremental crypto price and news ingestion")]
pub struct Cli {
    /// Path to the TOML config file (default: $TIDEMARK_HOME/tidemark.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Catch every symbol up to the current hour.
    Crypto(CryptoArgs),
    /// Fetch news published since the last run.
    News(NewsArgs),
    /// Run prices and news together, one summary per entity.
    All,
    /// Load a historical date range without moving watermarks.
    BulkLoad(BulkLoadArgs),
    /// Show watermarks and recent audit entries.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct CryptoArgs {
    /// Comma-separated symbols overriding the configured list.
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

#[derive(Debug, Args)]
pub struct NewsArgs {
    /// Search query overriding the configured one.
    #[arg(long)]
    pub query: Option<String>,
}

#[derive(Debug, Args)]
pub struct BulkLoadArgs {
    /// First day to load (YYYY-MM-DD, target clock).
    #[arg(long)]
    pub start: String,

    /// Last day to load, inclusive.
    #[arg(long)]
    pub end: String,

    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Skip writing the raw archive for the loaded range.
    #[arg(long)]
    pub no_archive: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Number of audit entries to show.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Restrict audit entries to one source.
    #[arg(long)]
    pub source: Option<String>,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn symbols_are_split_on_commas() {
        let cli = Cli::parse_from(["tidemark", "crypto", "--symbols", "btc-usd,ETH-USD"]);
        let Command::Crypto(args) = cli.command else {
            panic!("expected crypto command");
        };
        assert_eq!(args.symbols, vec!["btc-usd", "ETH-USD"]);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from(["tidemark", "status", "--log-format", "json", "-v"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Status(StatusArgs { limit: 20, .. })));
    }

    #[test]
    fn bulk_load_requires_range() {
        assert!(Cli::try_parse_from(["tidemark", "bulk-load", "--start", "2024-01-01"]).is_err());
    }
}
