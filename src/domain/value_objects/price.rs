use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::quantity::Quantity;
use crate::domain::errors::ValidationError;

/// Decimal places kept for execution and quote prices
pub const PRICE_SCALE: i64 = 6;

/// Strictly positive per-share price
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(BigDecimal);

impl Price {
    pub fn new(value: BigDecimal) -> Result<Self, ValidationError> {
        let rounded = value.round(PRICE_SCALE);
        if rounded <= BigDecimal::zero() {
            return Err(ValidationError::InvalidPrice(format!(
                "{} is not a positive price",
                value
            )));
        }
        Ok(Price(rounded))
    }

    /// Converts an upstream float, rejecting NaN, infinities and non-positive values
    pub fn from_f64(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        let decimal = BigDecimal::from_str(&value.to_string())
            .map_err(|e| ValidationError::InvalidPrice(e.to_string()))?;
        Price::new(decimal)
    }

    pub fn value(&self) -> &BigDecimal {
        &self.0
    }

    /// Exact notional of `shares` at this price
    pub fn notional(&self, shares: &Quantity) -> BigDecimal {
        &self.0 * shares.value()
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
