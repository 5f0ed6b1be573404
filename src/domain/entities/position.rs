use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::errors::ValidationError;
use crate::domain::value_objects::{price::Price, quantity::Quantity};

/// Decimal places kept for the weighted average cost basis
pub const AVG_COST_SCALE: i64 = 8;

/// An agent's open holding of one symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub agent_id: String,
    pub symbol: String,
    pub shares: Quantity,
    pub avg_cost: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of taking shares out of a position
#[derive(Debug, Clone, PartialEq)]
pub enum SellOutcome {
    Reduced(Quantity),
    Closed,
}

impl Position {
    pub fn open(
        agent_id: &str,
        symbol: &str,
        shares: Quantity,
        price: &Price,
        now: DateTime<Utc>,
    ) -> Self {
        Position {
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            shares,
            avg_cost: price.value().clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Position after buying `shares` more at `price`: `(S*C + s*p) / (S + s)`
    pub fn after_buy(
        &self,
        shares: &Quantity,
        price: &Price,
        now: DateTime<Utc>,
    ) -> Result<Position, ValidationError> {
        let held = self.shares.value();
        let total_shares = held + shares.value();
        let total_cost = held * &self.avg_cost + price.notional(shares);
        let avg_cost = (total_cost / &total_shares).round(AVG_COST_SCALE);

        Ok(Position {
            agent_id: self.agent_id.clone(),
            symbol: self.symbol.clone(),
            shares: Quantity::new(total_shares)?,
            avg_cost,
            created_at: self.created_at,
            updated_at: now,
        })
    }

    /// Shares left after selling `shares`; fails when that would go short
    pub fn after_sell(&self, shares: &Quantity) -> Result<SellOutcome, ValidationError> {
        if self.shares.value() < shares.value() {
            return Err(ValidationError::InvalidQuantity(format!(
                "cannot sell {} of {} held",
                shares, self.shares
            )));
        }
        let remaining = self.shares.value() - shares.value();
        if remaining <= BigDecimal::zero() {
            return Ok(SellOutcome::Closed);
        }
        Ok(SellOutcome::Reduced(Quantity::new(remaining)?))
    }
}
