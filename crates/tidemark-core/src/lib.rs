//! # Tidemark Core
//!
//! Domain types, provider contracts and resilience primitives for the tidemark
//! ingestion engine.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (Yahoo chart, NewsAPI) |
//! | [`archive`] | Raw-batch archival (Parquet with NDJSON fallback) |
//! | [`circuit_breaker`] | Circuit breaker for upstream calls |
//! | [`data_source`] | Price and news provider contracts |
//! | [`domain`] | Source ids, intervals, target clock, windows |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`retry`] | `RetryExecutor` and backoff policies |
//! | [`throttling`] | Client-side provider rate limits |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tidemark_core::{
//!     PriceProvider, ReqwestHttpClient, RetryExecutor, RetryPolicy, SourceId, TargetClock,
//!     TimeWindow, YahooChartAdapter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = YahooChartAdapter::new(Arc::new(ReqwestHttpClient::new()));
//!     let clock = TargetClock::default();
//!     let source = SourceId::parse("btc-usd")?;
//!     let end = clock.current_run_ceiling();
//!     let window = TimeWindow::new(end - time::Duration::hours(3), end)?;
//!
//!     let executor = RetryExecutor::new(RetryPolicy::default());
//!     let bars = executor
//!         .run("fetch BTC-USD", || {
//!             provider.fetch(&source, clock.to_utc_window(&window), Default::default())
//!         })
//!         .await?;
//!     println!("{} bars", bars.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Provider calls fail with a structured [`SourceError`]; its
//! [`SourceError::retryable`] flag decides whether the engine retries.
//!
//! ```rust
//! use tidemark_core::{SourceError, SourceErrorKind};
//!
//! fn should_back_off(error: &SourceError) -> bool {
//!     matches!(error.kind(), SourceErrorKind::RateLimited | SourceErrorKind::Unavailable)
//! }
//!
//! assert!(should_back_off(&SourceError::rate_limited("429")));
//! ```

pub mod adapters;
pub mod archive;
pub mod circuit_breaker;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod retry;
pub mod throttling;

// Adapter implementations
pub use adapters::{NewsApiAdapter, YahooChartAdapter};

// Archival
pub use archive::{
    ArchiveBatch, ArchiveError, ArchiveFormat, ArchiveHandle, ArchiveRecord, LocalArchiver,
    RawArchiver,
};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Provider contracts
pub use data_source::{
    Article, NewsProvider, PriceProvider, ProviderBar, SourceError, SourceErrorKind,
};

// Domain types
pub use domain::{
    floor_to_hour, FetchWindow, Interval, SourceId, TargetClock, TimeWindow, DEFAULT_OFFSET_HOURS,
};

// Error types
pub use error::{CoreError, ValidationError};

// HTTP client types
pub use http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

// Retry logic
pub use retry::{Backoff, RetryError, RetryExecutor, RetryPolicy};

// Throttling
pub use throttling::ProviderThrottle;
