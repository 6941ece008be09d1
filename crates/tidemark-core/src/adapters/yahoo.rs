use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::data_source::{PriceProvider, ProviderBar, SourceError};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::throttling::ProviderThrottle;
use crate::{FetchWindow, Interval, SourceId};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Price provider backed by the Yahoo Finance v8 chart endpoint.
#[derive(Clone)]
pub struct YahooChartAdapter {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    throttle: ProviderThrottle,
    timeout_ms: u64,
}

impl YahooChartAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            base_url: String::from(DEFAULT_BASE_URL),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "yahoo",
                CircuitBreakerConfig::default(),
            )),
            throttle: ProviderThrottle::new(std::time::Duration::from_secs(60), 120),
            timeout_ms: 10_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
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

    // `period2` is exclusive upstream, so it points one bar past the window end.
    fn chart_url(&self, source: &SourceId, window: FetchWindow, interval: Interval) -> String {
        let period1 = window.start.unix_timestamp();
        let period2 = (window.end + interval.duration()).unix_timestamp();
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval={}&includePrePost=false",
            self.base_url,
            urlencoding::encode(source.as_str()),
            period1,
            period2,
            yahoo_interval(interval),
        )
    }

    async fn fetch_chart(
        &self,
        source: &SourceId,
        window: FetchWindow,
        interval: Interval,
    ) -> Result<Vec<ProviderBar>, SourceError> {
        if !self.circuit_breaker.allow_request() {
            return Err(SourceError::unavailable(
                "yahoo circuit breaker is open; skipping upstream call",
            ));
        }
        self.throttle.acquire().await;

        let request = HttpRequest::get(self.chart_url(source, window, interval))
            .with_header("referer", "https://finance.yahoo.com/")
            .with_timeout_ms(self.timeout_ms);
        let response = self.http_client.execute(request).await.map_err(|error| {
            self.circuit_breaker.record_failure();
            if error.retryable() {
                SourceError::unavailable(format!("yahoo transport error: {}", error.message()))
            } else {
                SourceError::internal(format!("yahoo transport error: {}", error.message()))
            }
        })?;

        let bars = self.interpret(response, window)?;
        debug!(source = %source, bars = bars.len(), "yahoo chart fetched");
        Ok(bars)
    }

    fn interpret(
        &self,
        response: HttpResponse,
        window: FetchWindow,
    ) -> Result<Vec<ProviderBar>, SourceError> {
        match response.status {
            429 => {
                self.circuit_breaker.record_failure();
                Err(SourceError::rate_limited("yahoo returned status 429"))
            }
            status if status >= 500 => {
                self.circuit_breaker.record_failure();
                Err(SourceError::unavailable(format!(
                    "yahoo returned status {status}"
                )))
            }
            _ => {
                // The upstream is reachable; payload problems are not an outage.
                self.circuit_breaker.record_success();
                parse_chart(&response, window)
            }
        }
    }
}

impl PriceProvider for YahooChartAdapter {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn fetch<'a>(
        &'a self,
        source: &'a SourceId,
        window: FetchWindow,
        interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ProviderBar>, SourceError>> + Send + 'a>> {
        Box::pin(self.fetch_chart(source, window, interval))
    }
}

fn yahoo_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1m",
        Interval::FiveMinutes => "5m",
        Interval::FifteenMinutes => "15m",
        Interval::OneHour => "60m",
        Interval::OneDay => "1d",
    }
}

fn parse_chart(response: &HttpResponse, window: FetchWindow) -> Result<Vec<ProviderBar>, SourceError> {
    let chart: YahooChartResponse = serde_json::from_str(&response.body).map_err(|error| {
        if response.is_success() {
            SourceError::invalid_response(format!("failed to parse yahoo chart: {error}"))
        } else {
            SourceError::invalid_request(format!("yahoo returned status {}", response.status))
        }
    })?;

    if let Some(error) = chart.chart.error {
        // "Not Found" is how the chart API reports an empty range.
        if error.code.eq_ignore_ascii_case("Not Found") {
            return Ok(Vec::new());
        }
        let message = format!(
            "yahoo chart API error {}: {}",
            error.code,
            error.description.unwrap_or_default()
        );
        return Err(if response.is_success() {
            SourceError::invalid_response(message)
        } else {
            SourceError::invalid_request(message)
        });
    }
    if !response.is_success() {
        return Err(SourceError::invalid_request(format!(
            "yahoo returned status {}",
            response.status
        )));
    }

    let Some(result) = chart.chart.result.unwrap_or_default().into_iter().next() else {
        return Ok(Vec::new());
    };
    let Some(timestamps) = result.timestamp else {
        return Ok(Vec::new());
    };
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Ok(Vec::new());
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts_value) in timestamps.iter().enumerate() {
        let ts = OffsetDateTime::from_unix_timestamp(ts_value)
            .map_err(|e| SourceError::invalid_response(format!("invalid timestamp: {e}")))?;
        if ts < window.start || ts > window.end {
            continue;
        }

        let bar = ProviderBar {
            ts,
            open: value_at(&quote.open, i),
            high: value_at(&quote.high, i),
            low: value_at(&quote.low, i),
            close: value_at(&quote.close, i),
            volume: value_at(&quote.volume, i).map(|volume| volume.round() as i64),
        };
        if bar.open.is_none() && bar.high.is_none() && bar.low.is_none() && bar.close.is_none() {
            continue;
        }
        bars.push(bar);
    }

    bars.sort_by_key(|bar| bar.ts);
    Ok(bars)
}

fn value_at(values: &[Option<f64>], index: usize) -> Option<f64> {
    values.get(index).copied().flatten()
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartResponse {
    chart: YahooChartData,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartData {
    #[serde(default)]
    result: Option<Vec<YahooChartResult>>,
    #[serde(default)]
    error: Option<YahooChartError>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartError {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartResult {
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    indicators: YahooChartIndicators,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartIndicators {
    #[serde(default)]
    quote: Vec<YahooChartQuote>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::HttpError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use time::macros::datetime;

    struct RecordingHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = self
                .responses
                .lock()
                .expect("response queue should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::new("no canned response left")));
            Box::pin(async move { response })
        }
    }

    fn window() -> FetchWindow {
        FetchWindow {
            start: datetime!(2024-01-01 00:00 UTC),
            end: datetime!(2024-01-01 02:00 UTC),
        }
    }

    fn btc() -> SourceId {
        SourceId::parse("BTC-USD").expect("valid source")
    }

    const CHART_BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "BTC-USD"},
                "timestamp": [1704070800, 1704067200, 1704074400, 1704078000],
                "indicators": {"quote": [{
                    "open":   [101.0, 100.0, null, 103.0],
                    "high":   [111.0, 110.0, null, 113.0],
                    "low":    [91.0,  90.0,  null, 93.0],
                    "close":  [105.0, 104.0, null, 107.0],
                    "volume": [20,    10,    null, 40]
                }]}
            }],
            "error": null
        }
    }"#;

    #[tokio::test]
    async fn chart_request_covers_window_end_and_keeps_in_window_bars() {
        let client = Arc::new(RecordingHttpClient::new(vec![Ok(HttpResponse::ok_json(
            CHART_BODY,
        ))]));
        let adapter = YahooChartAdapter::new(client.clone()).with_base_url("https://chart.test/");

        let bars = adapter
            .fetch(&btc(), window(), Interval::OneHour)
            .await
            .expect("fetch should succeed");

        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            "https://chart.test/v8/finance/chart/BTC-USD?period1=1704067200&period2=1704078000&interval=60m&includePrePost=false"
        );

        // 02:00 has only nulls and 03:00 lies past the window end.
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].ts, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(bars[0].close, Some(104.0));
        assert_eq!(bars[1].volume, Some(20));
    }

    #[tokio::test]
    async fn not_found_range_is_empty_result() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let client = Arc::new(RecordingHttpClient::new(vec![Ok(HttpResponse::with_status(
            404, body,
        ))]));
        let adapter = YahooChartAdapter::new(client);

        let bars = adapter
            .fetch(&btc(), window(), Interval::OneHour)
            .await
            .expect("empty range is not an error");
        assert!(bars.is_empty());
    }

    #[tokio::test]
    async fn too_many_requests_is_retryable_rate_limit() {
        let client = Arc::new(RecordingHttpClient::new(vec![Ok(HttpResponse::with_status(
            429, "",
        ))]));
        let adapter = YahooChartAdapter::new(client);

        let error = adapter
            .fetch(&btc(), window(), Interval::OneHour)
            .await
            .expect_err("429 must fail");
        assert_eq!(error.kind(), SourceErrorKind::RateLimited);
        assert!(error.retryable());
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_repeated_outages() {
        let client = Arc::new(RecordingHttpClient::new(vec![
            Ok(HttpResponse::with_status(503, "")),
            Ok(HttpResponse::with_status(503, "")),
        ]));
        let adapter = YahooChartAdapter::new(client.clone()).with_circuit_breaker(Arc::new(
            CircuitBreaker::new(
                "yahoo",
                CircuitBreakerConfig {
                    failure_threshold: 2,
                    open_timeout: std::time::Duration::from_secs(60),
                },
            ),
        ));

        for _ in 0..2 {
            let error = adapter
                .fetch(&btc(), window(), Interval::OneHour)
                .await
                .expect_err("call should fail");
            assert_eq!(error.kind(), SourceErrorKind::Unavailable);
        }

        let error = adapter
            .fetch(&btc(), window(), Interval::OneHour)
            .await
            .expect_err("breaker should block request");
        assert!(error.message().contains("circuit breaker is open"));
        assert_eq!(client.recorded_requests().len(), 2);
    }
}
