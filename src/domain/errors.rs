use bigdecimal::BigDecimal;
use serde::Serialize;
use thiserror::Error;

use crate::persistence::DatabaseError;

/// Input validation failures, raised before anything touches the ledger
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Symbol is required")]
    EmptySymbol,

    #[error("side must be \"buy\" or \"sell\", got \"{0}\"")]
    InvalidSide(String),

    #[error("shares or amount is required")]
    MissingQuantity,

    #[error("Agent id is required")]
    EmptyAgentId,

    #[error("Value must be finite")]
    MustBeFinite,
}

/// Quote Provider failures. None of these ever falls back to a made-up price.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuoteError {
    #[error("Symbol is required")]
    EmptySymbol,

    #[error("No quote found for {symbol}")]
    NotFound { symbol: String },

    #[error("Invalid price for {symbol}")]
    InvalidPrice { symbol: String },

    #[error("Quote request for {symbol} timed out after {timeout_ms}ms")]
    Timeout { symbol: String, timeout_ms: u64 },

    #[error("Quote unavailable for {symbol}: {reason}")]
    Upstream { symbol: String, reason: String },
}

impl QuoteError {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            QuoteError::EmptySymbol => None,
            QuoteError::NotFound { symbol }
            | QuoteError::InvalidPrice { symbol }
            | QuoteError::Timeout { symbol, .. }
            | QuoteError::Upstream { symbol, .. } => Some(symbol),
        }
    }
}

/// Structured order rejection returned to the caller.
///
/// Everything except [`OrderError::Storage`] is an expected business outcome
/// and leaves the ledger untouched.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderError {
    #[error("{reason}")]
    Validation { reason: String },

    #[error("Quote unavailable for {symbol}: {reason}")]
    QuoteUnavailable { symbol: String, reason: String },

    #[error("Insufficient cash: required {required}, available {available}")]
    InsufficientFunds {
        required: BigDecimal,
        available: BigDecimal,
    },

    #[error("Insufficient shares to sell {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: BigDecimal,
        held: BigDecimal,
    },

    #[error("Order could not be committed after {attempts} attempt(s) due to concurrent writes")]
    PersistenceConflict { attempts: u32 },

    #[error("Ledger storage failure: {reason}")]
    Storage { reason: String },
}

impl OrderError {
    /// Short error code for logging and API responses
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::Validation { .. } => "ERR_VALIDATION",
            OrderError::QuoteUnavailable { .. } => "ERR_QUOTE_UNAVAILABLE",
            OrderError::InsufficientFunds { .. } => "ERR_INSUFFICIENT_FUNDS",
            OrderError::InsufficientShares { .. } => "ERR_INSUFFICIENT_SHARES",
            OrderError::PersistenceConflict { .. } => "ERR_PERSISTENCE_CONFLICT",
            OrderError::Storage { .. } => "ERR_STORAGE",
        }
    }

    /// Infrastructure faults the caller cannot fix by changing the order
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrderError::Storage { .. })
    }

    /// Whether resubmitting the same order later might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::QuoteUnavailable { .. } | OrderError::PersistenceConflict { .. }
        )
    }
}

impl From<ValidationError> for OrderError {
    fn from(error: ValidationError) -> Self {
        OrderError::Validation {
            reason: error.to_string(),
        }
    }
}

impl From<QuoteError> for OrderError {
    fn from(error: QuoteError) -> Self {
        match error {
            QuoteError::EmptySymbol => OrderError::Validation {
                reason: error.to_string(),
            },
            other => OrderError::QuoteUnavailable {
                symbol: other.symbol().unwrap_or_default().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<DatabaseError> for OrderError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::Conflict(_) => OrderError::PersistenceConflict { attempts: 1 },
            other => OrderError::Storage {
                reason: other.to_string(),
            },
        }
    }
}
