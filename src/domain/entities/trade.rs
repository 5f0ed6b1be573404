use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::order::{OrderSide, TradeSummary};
use crate::domain::value_objects::{price::Price, quantity::Quantity};

/// Immutable trade log entry. `total_value` is frozen at execution and never
/// recomputed from later prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: String,
    pub agent_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: Quantity,
    pub price: Price,
    pub total_value: BigDecimal,
    pub rationale: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    pub fn summary(&self) -> TradeSummary {
        TradeSummary {
            id: self.id.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            shares: self.shares.clone(),
            price: self.price.clone(),
            total_value: self.total_value.clone(),
            rationale: self.rationale.clone(),
            created_at: self.created_at,
        }
    }
}

/// A symbol whose cumulative bought and sold shares balance out
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPosition {
    pub symbol: String,
    pub shares: BigDecimal,
    pub avg_entry: BigDecimal,
    pub avg_exit: BigDecimal,
    pub total_cost: BigDecimal,
    pub total_proceeds: BigDecimal,
    pub pnl: BigDecimal,
    pub pnl_percent: BigDecimal,
    pub entry_date: DateTime<Utc>,
    pub exit_date: DateTime<Utc>,
}

/// One page of closed positions plus the unpaginated count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPositionPage {
    pub closed_positions: Vec<ClosedPosition>,
    pub total: usize,
}
