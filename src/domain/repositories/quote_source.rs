//! Quote Source Trait
//!
//! This module defines the `QuoteSource` trait, the seam between the ledger and
//! whatever market-data vendor supplies prices. The ledger only needs the raw
//! price fields; choosing among them and caching is the Quote Provider's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::QuoteError;

/// Raw price fields reported by the upstream source for one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot {
    pub regular_market_price: Option<f64>,
    pub post_market_price: Option<f64>,
    pub pre_market_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub market_time: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    /// First reported price in order live, post-close, pre-open, previous close
    pub fn preferred_price(&self) -> Option<f64> {
        self.regular_market_price
            .or(self.post_market_price)
            .or(self.pre_market_price)
            .or(self.previous_close)
    }
}

/// Upstream market-data source
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Name of the source, for logs
    fn name(&self) -> &str;

    /// Fetch current price fields for an already-normalized symbol
    async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot, QuoteError>;
}
