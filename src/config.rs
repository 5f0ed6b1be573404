use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;
use std::time::Duration;

/// Ledger-wide settings: starting cash, quote behaviour and order retries
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub starting_balance: BigDecimal,
    pub quote_cache_ttl: Duration,
    pub quote_cache_capacity: usize,
    pub quote_timeout: Duration,
    pub quote_requests_per_minute: u32,
    pub max_conflict_retries: u32, // Extra attempts after a busy/locked datastore
    pub conflict_backoff: Duration, // Multiplied by the attempt number
    pub yahoo_chart_url: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            starting_balance: BigDecimal::from(100_000),
            quote_cache_ttl: Duration::from_secs(60),
            quote_cache_capacity: 1024,
            quote_timeout: Duration::from_millis(5000),
            quote_requests_per_minute: 120,
            max_conflict_retries: 3,
            conflict_backoff: Duration::from_millis(25),
            yahoo_chart_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> LedgerConfig {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; invalid values are logged and the default kept
    pub fn from_lookup<F>(lookup: F) -> LedgerConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LedgerConfig::default();

        if let Some(balance) = lookup("STARTING_BALANCE") {
            match BigDecimal::from_str(balance.trim()) {
                Ok(value) if value > BigDecimal::zero() => {
                    config.starting_balance = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid STARTING_BALANCE value: {} (must be positive), using default: {}",
                        value,
                        config.starting_balance
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse STARTING_BALANCE '{}': {}, using default: {}",
                        balance,
                        e,
                        config.starting_balance
                    );
                }
            }
        }

        if let Some(value) = parse_in_range(&lookup, "QUOTE_CACHE_TTL_SECONDS", 1..=3600u64) {
            config.quote_cache_ttl = Duration::from_secs(value);
        }

        if let Some(value) = parse_in_range(&lookup, "QUOTE_CACHE_CAPACITY", 1..=1_000_000usize) {
            config.quote_cache_capacity = value;
        }

        if let Some(value) = parse_in_range(&lookup, "QUOTE_TIMEOUT_MILLISECONDS", 100..=60_000u64) {
            config.quote_timeout = Duration::from_millis(value);
        }

        if let Some(value) = parse_in_range(&lookup, "QUOTE_REQUESTS_PER_MINUTE", 1..=10_000u32) {
            config.quote_requests_per_minute = value;
        }

        if let Some(value) = parse_in_range(&lookup, "ORDER_MAX_CONFLICT_RETRIES", 0..=10u32) {
            config.max_conflict_retries = value;
        }

        if let Some(value) =
            parse_in_range(&lookup, "ORDER_CONFLICT_BACKOFF_MILLISECONDS", 0..=5_000u64)
        {
            config.conflict_backoff = Duration::from_millis(value);
        }

        if let Some(url) = lookup("YAHOO_CHART_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.starts_with("http://") || url.starts_with("https://") {
                config.yahoo_chart_url = url.to_string();
            } else {
                tracing::warn!(
                    "Invalid YAHOO_CHART_URL '{}', using default: {}",
                    url,
                    config.yahoo_chart_url
                );
            }
        }

        config
    }
}

fn parse_in_range<F, T>(lookup: &F, key: &str, range: std::ops::RangeInclusive<T>) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => Some(value),
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} (must be between {} and {}), using default",
                key,
                value,
                range.start(),
                range.end()
            );
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default", key, raw, e);
            None
        }
    }
}
