use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::errors::ValidationError;
use crate::domain::value_objects::{
    price::Price, quantity::Quantity, symbol::Symbol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(ValidationError::InvalidSide(s.to_string())),
        }
    }
}

/// How large the order is: a share count, or a cash amount converted at the quote
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderQuantity {
    Shares(f64),
    Amount(f64),
}

impl OrderQuantity {
    /// Resolves into a share count at the quoted price
    pub fn resolve(&self, price: &Price) -> Result<Quantity, ValidationError> {
        match *self {
            OrderQuantity::Shares(shares) => Quantity::from_f64(shares),
            OrderQuantity::Amount(amount) => Quantity::from_amount(amount, price),
        }
    }
}

/// Order body exactly as agents send it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderPayload {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub shares: Option<f64>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Order as accepted by the executor; `shares` wins over `amount` when both are sent
#[derive(Debug, Clone, PartialEq)]
pub struct OrderInput {
    pub symbol: String,
    pub side: String,
    pub quantity: OrderQuantity,
    pub rationale: Option<String>,
}

impl OrderInput {
    pub fn shares(symbol: &str, side: OrderSide, shares: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: side.as_str().to_string(),
            quantity: OrderQuantity::Shares(shares),
            rationale: None,
        }
    }

    pub fn amount(symbol: &str, side: OrderSide, amount: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: side.as_str().to_string(),
            quantity: OrderQuantity::Amount(amount),
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

impl TryFrom<OrderPayload> for OrderInput {
    type Error = ValidationError;

    fn try_from(payload: OrderPayload) -> Result<Self, Self::Error> {
        let quantity = match (payload.shares, payload.amount) {
            (Some(shares), _) => OrderQuantity::Shares(shares),
            (None, Some(amount)) => OrderQuantity::Amount(amount),
            (None, None) => return Err(ValidationError::MissingQuantity),
        };
        Ok(OrderInput {
            symbol: payload.symbol.unwrap_or_default(),
            side: payload.side.unwrap_or_default(),
            quantity,
            rationale: payload.reasoning,
        })
    }
}

/// Canonical, fully validated order with its execution price fixed
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub agent_id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub shares: Quantity,
    pub price: Price,
    pub rationale: Option<String>,
}

impl OrderRequest {
    /// `shares * price`, frozen at execution
    pub fn notional(&self) -> BigDecimal {
        self.price.notional(&self.shares)
    }
}

/// What the caller gets back for an executed order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSummary {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: Quantity,
    pub price: Price,
    pub total_value: BigDecimal,
    pub rationale: Option<String>,
    pub created_at: DateTime<Utc>,
}
