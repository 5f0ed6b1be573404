//! Yahoo Finance quote source
//!
//! Reads the `meta` block of the v8 chart endpoint, which carries the live,
//! extended-hours and previous-close prices for a symbol.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::errors::QuoteError;
use crate::domain::repositories::quote_source::{MarketSnapshot, QuoteSource};

/// Chart API response envelope
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    post_market_price: Option<f64>,
    pre_market_price: Option<f64>,
    previous_close: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_time: Option<i64>,
}

impl From<ChartMeta> for MarketSnapshot {
    fn from(meta: ChartMeta) -> Self {
        MarketSnapshot {
            regular_market_price: meta.regular_market_price,
            post_market_price: meta.post_market_price,
            pre_market_price: meta.pre_market_price,
            previous_close: meta.previous_close.or(meta.chart_previous_close),
            market_time: meta
                .regular_market_time
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        }
    }
}

/// Yahoo Finance client
#[derive(Debug, Clone)]
pub struct YahooQuoteSource {
    client: Client,
    base_url: String,
}

impl YahooQuoteSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/{symbol}?interval=1d&range=1d`
    fn chart_url(&self, symbol: &str) -> Result<Url, QuoteError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| upstream(symbol, e))?;
        url.path_segments_mut()
            .map_err(|_| upstream(symbol, "chart URL cannot take a path"))?
            .push(symbol);
        url.query_pairs_mut()
            .append_pair("interval", "1d")
            .append_pair("range", "1d");
        Ok(url)
    }
}

#[async_trait]
impl QuoteSource for YahooQuoteSource {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot, QuoteError> {
        let url = self.chart_url(symbol)?;
        debug!("Fetching quote for {} from {}", symbol, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| upstream(symbol, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(QuoteError::NotFound {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(upstream(symbol, format!("API error {}: {}", status, error_text)));
        }

        let body = response.text().await.map_err(|e| upstream(symbol, e))?;
        parse_chart(symbol, &body)
    }
}

fn upstream(symbol: &str, reason: impl std::fmt::Display) -> QuoteError {
    QuoteError::Upstream {
        symbol: symbol.to_string(),
        reason: reason.to_string(),
    }
}

/// Map a chart response body onto the raw price fields
fn parse_chart(symbol: &str, body: &str) -> Result<MarketSnapshot, QuoteError> {
    let response: ChartResponse = serde_json::from_str(body)
        .map_err(|e| upstream(symbol, format!("Failed to parse chart response: {}", e)))?;

    if let Some(error) = response.chart.error {
        if error.code.eq_ignore_ascii_case("not found") {
            return Err(QuoteError::NotFound {
                symbol: symbol.to_string(),
            });
        }
        return Err(upstream(
            symbol,
            format!("[{}] {}", error.code, error.description),
        ));
    }

    response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .map(|result| MarketSnapshot::from(result.meta))
        .ok_or_else(|| QuoteError::NotFound {
            symbol: symbol.to_string(),
        })
}
