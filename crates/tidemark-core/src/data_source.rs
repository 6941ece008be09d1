//! Provider contracts and the payloads they return.
//!
//! # Providers
//!
//! | Trait | Request | Response |
//! |-------|---------|----------|
//! | [`PriceProvider`] | source, [`FetchWindow`], [`Interval`] | [`ProviderBar`]s |
//! | [`NewsProvider`] | query, from-date, page size | [`Article`]s |
//!
//! An empty `Vec` means the provider confirmed there is no data for the
//! request. A failed call is always an `Err(SourceError)`, so the engine can
//! retry failures without ever retrying a legitimate "nothing here".

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{FetchWindow, Interval, SourceId};

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    InvalidRequest,
    InvalidResponse,
    Internal,
}

/// Structured provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    /// The upstream answered, but with a payload that cannot be used.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidResponse,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// One OHLCV bar as delivered by a price provider, stamped in UTC.
///
/// Prices are optional because providers emit gaps as nulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBar {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
}

/// One news article as delivered by a news provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    pub source_name: Option<String>,
    pub url: String,
}

/// Market-data provider contract.
///
/// Implementations must be `Send + Sync`; one instance serves every worker.
pub trait PriceProvider: Send + Sync {
    /// Short provider name, used in archive paths and logs.
    fn name(&self) -> &'static str;

    /// Fetch every bar of `interval` whose timestamp lies in `window`
    /// (both ends inclusive).
    fn fetch<'a>(
        &'a self,
        source: &'a SourceId,
        window: FetchWindow,
        interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ProviderBar>, SourceError>> + Send + 'a>>;
}

/// News provider contract.
pub trait NewsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch up to `page_size` articles matching `query` published on or
    /// after `from_date`, newest first.
    fn fetch<'a>(
        &'a self,
        query: &'a str,
        from_date: Date,
        page_size: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Article>, SourceError>> + Send + 'a>>;
}
