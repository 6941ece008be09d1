//! Engine configuration.
//!
//! One [`IngestConfig`] is built at process start (TOML file, then environment
//! overrides) and passed by reference to everything that needs it.
//!
//! ```toml
//! [crypto]
//! symbols = ["BTC-USD", "ETH-USD"]
//! interval = "1h"
//! batch_span_hours = 6
//!
//! [news]
//! query = "crypto OR bitcoin OR ethereum"
//! lookback_days = 1
//!
//! [retry]
//! max_attempts = 3
//! backoff = "linear"
//! base_delay_ms = 2000
//!
//! [pool]
//! small_max_sources = 5
//! small_workers = 2
//!
//! [clock]
//! utc_offset_hours = 7
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use tidemark_core::{
    ArchiveFormat, Backoff, Interval, RetryPolicy, SourceId, TargetClock, DEFAULT_OFFSET_HOURS,
};
use tidemark_warehouse::sqltime::parse_timestamp;
use tidemark_warehouse::{resolve_tidemark_home, WarehouseConfig};

use crate::error::ConfigError;
use crate::orchestrator::WorkerPoolPolicy;

/// Config file looked up under the tidemark home when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tidemark.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub store: StoreSettings,
    pub crypto: CryptoSettings,
    pub news: NewsSettings,
    pub retry: RetrySettings,
    pub pool: WorkerPoolPolicy,
    pub archive: ArchiveSettings,
    pub clock: ClockSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Data directory; `TIDEMARK_HOME` or `~/.tidemark` when unset.
    pub home: Option<PathBuf>,
    /// Database file; `<home>/warehouse.duckdb` when unset.
    pub db_path: Option<PathBuf>,
    pub max_pool_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            home: None,
            db_path: None,
            max_pool_size: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CryptoSettings {
    pub symbols: Vec<String>,
    pub interval: Interval,
    /// Upper bound on one batch window.
    pub batch_span_hours: u32,
    /// Resume point for a source with no watermark and no stored prices.
    pub epoch: String,
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            symbols: ["BTC-USD", "ETH-USD", "SOL-USD", "XRP-USD", "DOGE-USD"]
                .into_iter()
                .map(String::from)
                .collect(),
            interval: Interval::OneHour,
            batch_span_hours: 6,
            epoch: String::from("2024-01-01 00:00:00"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NewsSettings {
    /// Identifier the news feed is tracked under in watermarks and logs.
    pub source: String,
    pub query: String,
    pub lookback_days: u32,
    pub page_size: u32,
    /// Name of the environment variable holding the NewsAPI key.
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for NewsSettings {
    fn default() -> Self {
        Self {
            source: String::from("NEWSAPI"),
            query: String::from("crypto OR bitcoin OR ethereum"),
            lookback_days: 1,
            page_size: 100,
            api_key_env: String::from("NEWSAPI_KEY"),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    /// Cap for exponential backoff.
    pub max_delay_ms: u64,
    /// Per-attempt timeout; 0 disables it.
    pub call_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Linear,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.base_delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed { delay: base },
            BackoffKind::Linear => Backoff::Linear { step: base },
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                factor: 2.0,
                max: Duration::from_millis(self.max_delay_ms),
                jitter: true,
            },
        };
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff,
            attempt_timeout: (self.call_timeout_ms > 0)
                .then(|| Duration::from_millis(self.call_timeout_ms)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveSettings {
    /// Archive root; `<home>/archive` when unset.
    pub root: Option<PathBuf>,
    pub format: ArchiveFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClockSettings {
    pub utc_offset_hours: i8,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            utc_offset_hours: DEFAULT_OFFSET_HOURS,
        }
    }
}

impl IngestConfig {
    /// Load configuration from `path`, or from `<home>/tidemark.toml` when it
    /// exists, or fall back to defaults. Environment overrides are applied and
    /// the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let candidate = resolve_tidemark_home().join(DEFAULT_CONFIG_FILE);
                if candidate.is_file() {
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&raw).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply environment overrides through `lookup`; empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(home) = lookup("TIDEMARK_HOME") {
            self.store.home = Some(PathBuf::from(home));
        }
        if let Some(db_path) = lookup("TIDEMARK_DB_PATH") {
            self.store.db_path = Some(PathBuf::from(db_path));
        }
        if let Some(symbols) = lookup("TIDEMARK_SYMBOLS") {
            self.crypto.symbols = symbols
                .split(',')
                .map(str::trim)
                .filter(|symbol| !symbol.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(root) = lookup("TIDEMARK_ARCHIVE_DIR") {
            self.archive.root = Some(PathBuf::from(root));
        }
        if let Some(key) = lookup(self.news.api_key_env.as_str()) {
            self.news.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.symbols()?;
        self.news_source()?;
        self.clock()?;
        self.epoch()?;

        if self.crypto.batch_span_hours == 0 {
            return Err(ConfigError::Invalid(String::from(
                "crypto.batch_span_hours must be greater than zero",
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "retry.max_attempts must be greater than zero",
            )));
        }
        if self.news.page_size == 0 {
            return Err(ConfigError::Invalid(String::from(
                "news.page_size must be greater than zero",
            )));
        }
        if self.store.max_pool_size == 0 {
            return Err(ConfigError::Invalid(String::from(
                "store.max_pool_size must be greater than zero",
            )));
        }
        self.pool.validate()
    }

    /// Configured symbols, normalized. Fails on an empty list.
    pub fn symbols(&self) -> Result<Vec<SourceId>, ConfigError> {
        if self.crypto.symbols.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "crypto.symbols must list at least one symbol",
            )));
        }
        self.crypto
            .symbols
            .iter()
            .map(|symbol| SourceId::parse(symbol).map_err(ConfigError::from))
            .collect()
    }

    pub fn news_source(&self) -> Result<SourceId, ConfigError> {
        Ok(SourceId::parse(&self.news.source)?)
    }

    pub fn clock(&self) -> Result<TargetClock, ConfigError> {
        Ok(TargetClock::from_hours(self.clock.utc_offset_hours)?)
    }

    pub fn epoch(&self) -> Result<PrimitiveDateTime, ConfigError> {
        parse_timestamp(&self.crypto.epoch).map_err(|error| {
            ConfigError::Invalid(format!("crypto.epoch: {error}"))
        })
    }

    pub fn batch_span(&self) -> time::Duration {
        time::Duration::hours(i64::from(self.crypto.batch_span_hours))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn home(&self) -> PathBuf {
        self.store
            .home
            .clone()
            .unwrap_or_else(resolve_tidemark_home)
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        let tidemark_home = self.home();
        let db_path = self
            .store
            .db_path
            .clone()
            .unwrap_or_else(|| tidemark_home.join("warehouse.duckdb"));
        WarehouseConfig {
            tidemark_home,
            db_path,
            max_pool_size: self.store.max_pool_size,
        }
    }

    pub fn archive_root(&self) -> PathBuf {
        self.archive
            .root
            .clone()
            .unwrap_or_else(|| self.home().join("archive"))
    }
}
