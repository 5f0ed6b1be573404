use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

/// Ticker symbol, trimmed and uppercased
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        Ok(Symbol(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
