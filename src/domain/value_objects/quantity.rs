use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::price::Price;
use crate::domain::errors::ValidationError;

/// Share quantities carry four decimal places
pub const SHARE_SCALE: i64 = 4;

/// Strictly positive share count, truncated (never rounded up) to [`SHARE_SCALE`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(BigDecimal);

impl Quantity {
    pub fn new(value: BigDecimal) -> Result<Self, ValidationError> {
        let truncated = value.with_scale(SHARE_SCALE);
        if truncated <= BigDecimal::zero() {
            return Err(ValidationError::InvalidQuantity(
                "shares or amount must yield positive shares".to_string(),
            ));
        }
        Ok(Quantity(truncated))
    }

    pub fn from_f64(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        let decimal = BigDecimal::from_str(&value.to_string())
            .map_err(|e| ValidationError::InvalidQuantity(e.to_string()))?;
        Quantity::new(decimal)
    }

    /// Shares purchasable with a cash `amount`: `floor(amount / price * 10^4) / 10^4`
    pub fn from_amount(amount: f64, price: &Price) -> Result<Self, ValidationError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ValidationError::InvalidQuantity(
                "amount must be a positive number".to_string(),
            ));
        }
        let amount = BigDecimal::from_str(&amount.to_string())
            .map_err(|e| ValidationError::InvalidQuantity(e.to_string()))?;
        // Price is strictly positive, so the division cannot panic and
        // truncation toward zero is the floor.
        Quantity::new(amount / price.value())
    }

    pub fn value(&self) -> &BigDecimal {
        &self.0
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
