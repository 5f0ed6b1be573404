//! QuoteProvider - resolves a tradable price for a symbol
//!
//! Lookups go cache first, then through the upstream rate limiter and the
//! [`QuoteSource`]. One timeout bounds the whole lookup, including the wait
//! for another caller's fetch of the same symbol. A price is never synthesized: if the
//! source has nothing usable the caller gets a [`QuoteError`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::LedgerConfig;
use crate::domain::entities::quote::Quote;
use crate::domain::errors::QuoteError;
use crate::domain::repositories::quote_source::{MarketSnapshot, QuoteSource};
use crate::domain::services::clock::Clock;
use crate::domain::services::quote_cache::QuoteCache;
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::symbol::Symbol;
use crate::rate_limit::{self, RateLimiterConfig, UpstreamRateLimiter};

#[derive(Debug, Clone)]
pub struct QuoteProviderConfig {
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub timeout: Duration,
    pub requests_per_minute: u32,
}

impl Default for QuoteProviderConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 1024,
            timeout: Duration::from_secs(5),
            requests_per_minute: RateLimiterConfig::default().requests_per_minute,
        }
    }
}

impl From<&LedgerConfig> for QuoteProviderConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            cache_ttl: config.quote_cache_ttl,
            cache_capacity: config.quote_cache_capacity,
            timeout: config.quote_timeout,
            requests_per_minute: config.quote_requests_per_minute,
        }
    }
}

pub struct QuoteProvider {
    source: Arc<dyn QuoteSource>,
    cache: QuoteCache,
    limiter: UpstreamRateLimiter,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl QuoteProvider {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        config: QuoteProviderConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = chrono::Duration::from_std(config.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        Self {
            source,
            cache: QuoteCache::new(config.cache_capacity, ttl, clock.clone()),
            limiter: rate_limit::create_rate_limiter(RateLimiterConfig {
                requests_per_minute: config.requests_per_minute,
            }),
            timeout: config.timeout,
            clock,
        }
    }

    /// Get a quote for `symbol` (trimmed and uppercased)
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let symbol = Symbol::parse(symbol).map_err(|_| QuoteError::EmptySymbol)?;
        let lookup = self
            .cache
            .get_or_fetch(symbol.as_str(), || self.fetch(symbol.as_str()));

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Quote request for {} via {} timed out after {:?}",
                    symbol,
                    self.source.name(),
                    self.timeout
                );
                Err(QuoteError::Timeout {
                    symbol: symbol.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, QuoteError> {
        rate_limit::acquire(&self.limiter).await;
        let snapshot = self.source.fetch(symbol).await.map_err(|e| {
            tracing::warn!("Quote lookup for {} failed: {}", symbol, e);
            e
        })?;

        self.resolve(symbol, &snapshot)
    }

    fn resolve(&self, symbol: &str, snapshot: &MarketSnapshot) -> Result<Quote, QuoteError> {
        let raw = snapshot.preferred_price().ok_or_else(|| {
            tracing::warn!("{} reported no price for {}", self.source.name(), symbol);
            QuoteError::InvalidPrice {
                symbol: symbol.to_string(),
            }
        })?;

        let price = Price::from_f64(raw).map_err(|_| {
            tracing::warn!("{} reported an unusable price for {}: {}", self.source.name(), symbol, raw);
            QuoteError::InvalidPrice {
                symbol: symbol.to_string(),
            }
        })?;

        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            timestamp: snapshot.market_time.unwrap_or_else(|| self.clock.now()),
        })
    }
}
