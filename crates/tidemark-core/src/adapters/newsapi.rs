use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::data_source::{Article, NewsProvider, SourceError};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::throttling::ProviderThrottle;

const DEFAULT_BASE_URL: &str = "https://newsapi.org";

/// News provider backed by the NewsAPI `/v2/everything` endpoint.
#[derive(Clone)]
pub struct NewsApiAdapter {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    auth: HttpAuth,
    circuit_breaker: Arc<CircuitBreaker>,
    throttle: ProviderThrottle,
    timeout_ms: u64,
}

impl NewsApiAdapter {
    /// `api_key` is sent in the `X-Api-Key` header; an empty key makes every
    /// fetch fail with a non-retryable error.
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let auth = if api_key.trim().is_empty() {
            HttpAuth::None
        } else {
            HttpAuth::Header {
                name: String::from("X-Api-Key"),
                value: api_key,
            }
        };
        Self {
            http_client,
            base_url: String::from(DEFAULT_BASE_URL),
            auth,
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "newsapi",
                CircuitBreakerConfig::default(),
            )),
            throttle: ProviderThrottle::new(std::time::Duration::from_secs(60), 30),
            timeout_ms: 15_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_throttle(mut self, throttle: ProviderThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn everything_url(
        &self,
        query: &str,
        from_date: Date,
        page_size: u32,
    ) -> Result<String, SourceError> {
        let from = from_date
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(|error| SourceError::internal(format!("invalid from date: {error}")))?;
        Ok(format!(
            "{}/v2/everything?q={}&from={}&language=en&sortBy=publishedAt&pageSize={}",
            self.base_url,
            urlencoding::encode(query),
            from,
            page_size.clamp(1, 100),
        ))
    }

    async fn fetch_articles(
        &self,
        query: &str,
        from_date: Date,
        page_size: u32,
    ) -> Result<Vec<Article>, SourceError> {
        if self.auth == HttpAuth::None {
            return Err(SourceError::invalid_request("NewsAPI key is not configured"));
        }
        if query.trim().is_empty() {
            return Err(SourceError::invalid_request("news query must not be empty"));
        }
        if !self.circuit_breaker.allow_request() {
            return Err(SourceError::unavailable(
                "newsapi circuit breaker is open; skipping upstream call",
            ));
        }
        self.throttle.acquire().await;

        let request = HttpRequest::get(self.everything_url(query, from_date, page_size)?)
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout_ms);
        let response = self.http_client.execute(request).await.map_err(|error| {
            self.circuit_breaker.record_failure();
            SourceError::unavailable(format!("newsapi transport error: {}", error.message()))
        })?;

        match response.status {
            429 => {
                self.circuit_breaker.record_failure();
                return Err(SourceError::rate_limited("newsapi returned status 429"));
            }
            status if status >= 500 => {
                self.circuit_breaker.record_failure();
                return Err(SourceError::unavailable(format!(
                    "newsapi returned status {status}"
                )));
            }
            _ => self.circuit_breaker.record_success(),
        }

        let payload: NewsApiResponse = serde_json::from_str(&response.body).map_err(|error| {
            SourceError::invalid_response(format!("failed to parse newsapi payload: {error}"))
        })?;
        if !response.is_success() || payload.status.as_deref() == Some("error") {
            return Err(SourceError::invalid_request(format!(
                "newsapi error {}: {}",
                payload.code.unwrap_or_else(|| response.status.to_string()),
                payload.message.unwrap_or_default()
            )));
        }
        let Some(raw_articles) = payload.articles else {
            return Err(SourceError::invalid_response(
                "newsapi payload has no 'articles' field",
            ));
        };

        let total = raw_articles.len();
        let articles = raw_articles
            .into_iter()
            .filter_map(NewsApiArticle::normalize)
            .collect::<Vec<_>>();
        debug!(
            received = total,
            kept = articles.len(),
            "newsapi articles fetched"
        );
        Ok(articles)
    }
}

impl NewsProvider for NewsApiAdapter {
    fn name(&self) -> &'static str {
        "newsapi"
    }

    fn fetch<'a>(
        &'a self,
        query: &'a str,
        from_date: Date,
        page_size: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Article>, SourceError>> + Send + 'a>> {
        Box::pin(self.fetch_articles(query, from_date, page_size))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Option<Vec<NewsApiArticle>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    #[serde(default)]
    source: Option<NewsApiSource>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSource {
    #[serde(default)]
    name: Option<String>,
}

impl NewsApiArticle {
    // Articles without a url or a parseable timestamp cannot be deduplicated or placed.
    fn normalize(self) -> Option<Article> {
        let url = self.url.filter(|url| !url.trim().is_empty())?;
        let published_at = OffsetDateTime::parse(self.published_at?.as_str(), &Rfc3339).ok()?;
        Some(Article {
            title: self.title,
            description: self.description,
            content: self.content,
            published_at,
            source_name: self.source.and_then(|source| source.name),
            url,
        })
    }
}
