//! Portfolio entities - cash ledger rows, equity snapshots and valuations

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// An agent's cash account. `starting_balance` is written once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub agent_id: String,
    pub cash_balance: BigDecimal,
    pub starting_balance: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point on an agent's equity curve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub id: String,
    pub agent_id: String,
    pub total_value: BigDecimal,
    pub created_at: DateTime<Utc>,
}

/// Mark-to-market detail for one open position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionValuation {
    pub symbol: String,
    pub shares: BigDecimal,
    pub avg_cost: BigDecimal,
    pub current_price: BigDecimal,
    pub value: BigDecimal,
    /// Set when the quote failed and the cost basis stood in for the price
    pub price_is_stale: bool,
}

/// Cash plus marked positions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkToMarket {
    pub cash_balance: BigDecimal,
    pub positions_value: BigDecimal,
    pub total_value: BigDecimal,
    pub positions: Vec<PositionValuation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioValuation {
    pub cash_balance: BigDecimal,
    pub positions_value: BigDecimal,
    pub total_value: BigDecimal,
    pub starting_balance: BigDecimal,
    pub pnl: BigDecimal,
    pub pnl_percent: BigDecimal,
    pub positions: Vec<PositionValuation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub agent_id: String,
    pub cash_balance: BigDecimal,
    pub total_value: BigDecimal,
    pub starting_balance: BigDecimal,
    pub pnl: BigDecimal,
    pub pnl_percent: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardSort {
    #[default]
    Pnl,
    Value,
    Recent,
}

impl std::str::FromStr for LeaderboardSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pnl" => Ok(LeaderboardSort::Pnl),
            "value" => Ok(LeaderboardSort::Value),
            "recent" => Ok(LeaderboardSort::Recent),
            other => Err(format!("unknown sort \"{}\", expected pnl, value or recent", other)),
        }
    }
}
