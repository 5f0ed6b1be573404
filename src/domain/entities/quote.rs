use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::value_objects::price::Price;

/// Resolved market price for a symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}
