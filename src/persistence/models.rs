//! Database Models
//!
//! Row shapes for the ledger tables. Decimal columns come back as text and are
//! parsed into domain values here; anything unparseable is reported as
//! [`DatabaseError::Corrupt`] instead of being coerced.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use super::DatabaseError;
use crate::domain::entities::order::OrderSide;
use crate::domain::entities::portfolio::{Portfolio, PortfolioSnapshot};
use crate::domain::entities::position::Position;
use crate::domain::entities::trade::Trade;
use crate::domain::value_objects::{price::Price, quantity::Quantity};

const ID_LENGTH: usize = 21;

/// Random URL-safe identifier for trades and snapshots
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

fn parse_decimal(column: &'static str, value: &str) -> Result<BigDecimal, DatabaseError> {
    BigDecimal::from_str(value).map_err(|_| DatabaseError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn parse_quantity(column: &'static str, value: &str) -> Result<Quantity, DatabaseError> {
    Quantity::new(parse_decimal(column, value)?).map_err(|_| DatabaseError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn parse_price(column: &'static str, value: &str) -> Result<Price, DatabaseError> {
    Price::new(parse_decimal(column, value)?).map_err(|_| DatabaseError::Corrupt {
        column,
        value: value.to_string(),
    })
}

/// Portfolio record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioRecord {
    pub agent_id: String,
    pub cash_balance: String,
    pub starting_balance: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PortfolioRecord> for Portfolio {
    type Error = DatabaseError;

    fn try_from(record: PortfolioRecord) -> Result<Self, Self::Error> {
        Ok(Portfolio {
            cash_balance: parse_decimal("portfolios.cash_balance", &record.cash_balance)?,
            starting_balance: parse_decimal(
                "portfolios.starting_balance",
                &record.starting_balance,
            )?,
            agent_id: record.agent_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Position record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionRecord {
    pub agent_id: String,
    pub symbol: String,
    pub shares: String,
    pub avg_cost: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PositionRecord> for Position {
    type Error = DatabaseError;

    fn try_from(record: PositionRecord) -> Result<Self, Self::Error> {
        Ok(Position {
            shares: parse_quantity("positions.shares", &record.shares)?,
            avg_cost: parse_decimal("positions.avg_cost", &record.avg_cost)?,
            agent_id: record.agent_id,
            symbol: record.symbol,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Trade record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub agent_id: String,
    pub symbol: String,
    pub side: String, // "buy" or "sell"
    pub shares: String,
    pub price: String,
    pub total_value: String,
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TradeRecord> for Trade {
    type Error = DatabaseError;

    fn try_from(record: TradeRecord) -> Result<Self, Self::Error> {
        let side = OrderSide::from_str(&record.side).map_err(|_| DatabaseError::Corrupt {
            column: "trades.side",
            value: record.side.clone(),
        })?;

        Ok(Trade {
            side,
            shares: parse_quantity("trades.shares", &record.shares)?,
            price: parse_price("trades.price", &record.price)?,
            total_value: parse_decimal("trades.total_value", &record.total_value)?,
            id: record.id,
            agent_id: record.agent_id,
            symbol: record.symbol,
            rationale: record.reasoning,
            created_at: record.created_at,
        })
    }
}

/// Snapshot record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SnapshotRecord {
    pub id: String,
    pub agent_id: String,
    pub total_value: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRecord> for PortfolioSnapshot {
    type Error = DatabaseError;

    fn try_from(record: SnapshotRecord) -> Result<Self, Self::Error> {
        Ok(PortfolioSnapshot {
            total_value: parse_decimal("portfolio_snapshots.total_value", &record.total_value)?,
            id: record.id,
            agent_id: record.agent_id,
            created_at: record.created_at,
        })
    }
}

/// Convert a batch of records, failing on the first corrupt row
pub fn into_domain<R, T>(records: Vec<R>) -> Result<Vec<T>, DatabaseError>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    records.into_iter().map(T::try_from).collect()
}
