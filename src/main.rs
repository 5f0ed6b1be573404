//! clawtrade - paper-trading ledger CLI
//!
//! Every command prints one JSON document on stdout. Logs go to stderr.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clawtrade_ledger::application::services::ledger_service::{LedgerService, TradeQuery};
use clawtrade_ledger::config::LedgerConfig;
use clawtrade_ledger::domain::entities::order::{OrderInput, OrderPayload};
use clawtrade_ledger::domain::entities::portfolio::LeaderboardSort;
use clawtrade_ledger::domain::errors::{OrderError, QuoteError, ValidationError};
use clawtrade_ledger::domain::services::clock::SystemClock;
use clawtrade_ledger::domain::value_objects::page::PageRequest;
use clawtrade_ledger::infrastructure::yahoo_client::YahooQuoteSource;
use clawtrade_ledger::persistence::{init_database, DatabaseConfig, DatabaseError};

#[derive(Parser)]
#[command(name = "clawtrade")]
#[command(about = "Paper-trading ledger for trading agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Current price of a symbol
    Quote {
        symbol: String,
    },
    /// Place a market order at the current quote
    Order {
        /// Agent placing the order
        #[arg(long)]
        agent: String,
        #[arg(short, long)]
        symbol: String,
        /// buy or sell
        #[arg(long)]
        side: String,
        /// Number of shares (wins over --amount)
        #[arg(short = 'n', long)]
        shares: Option<f64>,
        /// Cash amount, converted to shares at the quote
        #[arg(short, long)]
        amount: Option<f64>,
        /// Free-text reasoning stored with the trade
        #[arg(short, long)]
        reasoning: Option<String>,
    },
    /// Cash, marked-to-market value and P&L
    Portfolio {
        #[arg(long)]
        agent: String,
    },
    /// Open positions
    Positions {
        #[arg(long)]
        agent: String,
    },
    /// Trade history, newest first
    Trades {
        #[arg(long)]
        agent: String,
        #[arg(short, long)]
        limit: Option<u32>,
        /// Only trades strictly before this RFC 3339 timestamp
        #[arg(short, long)]
        before: Option<DateTime<Utc>>,
    },
    /// Newest trades across every agent
    Feed {
        #[arg(short, long)]
        limit: Option<u32>,
        /// Only trades strictly before this RFC 3339 timestamp
        #[arg(short, long)]
        before: Option<DateTime<Utc>>,
    },
    /// Round-trip positions whose buys and sells net out
    Closed {
        #[arg(long)]
        agent: String,
        #[arg(short, long)]
        limit: Option<u32>,
        #[arg(short, long)]
        offset: Option<u32>,
    },
    /// Equity curve, oldest first
    Equity {
        #[arg(long)]
        agent: String,
        #[arg(short, long)]
        limit: Option<u32>,
        #[arg(short, long)]
        offset: Option<u32>,
    },
    /// Rank every agent's portfolio
    Leaderboard {
        /// pnl, value or recent
        #[arg(short, long, default_value = "pnl")]
        sort: LeaderboardSort,
        #[arg(short, long)]
        limit: Option<u32>,
        #[arg(short, long)]
        offset: Option<u32>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Setup(String),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Output(#[from] serde_json::Error),
}

impl CliError {
    fn to_json(&self) -> Value {
        match self {
            CliError::Order(e) => json!({
                "success": false,
                "code": e.code(),
                "error": e.to_string(),
                "details": e,
            }),
            CliError::Quote(e) => json!({
                "success": false,
                "code": "ERR_QUOTE_UNAVAILABLE",
                "error": e.to_string(),
                "details": e,
            }),
            other => json!({
                "success": false,
                "error": other.to_string(),
            }),
        }
    }
}

impl From<ValidationError> for CliError {
    fn from(e: ValidationError) -> Self {
        CliError::Order(OrderError::from(e))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clawtrade_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(body) => {
            println!("{}", body);
            ExitCode::SUCCESS
        }
        Err(e) => {
            debug!("Command failed: {}", e);
            let body = serde_json::to_string_pretty(&e.to_json())
                .unwrap_or_else(|_| format!("{{\"success\":false,\"error\":{:?}}}", e.to_string()));
            println!("{}", body);
            ExitCode::FAILURE
        }
    }
}

async fn connect() -> Result<LedgerService, CliError> {
    let config = LedgerConfig::from_env();
    let db_config = DatabaseConfig::from_env();

    let pool = init_database(&db_config)
        .await
        .map_err(|e| CliError::Setup(format!("Database unavailable: {}", e)))?;

    let source = YahooQuoteSource::new(
        &config.yahoo_chart_url,
        config.quote_timeout + Duration::from_secs(1),
    )
    .map_err(CliError::Setup)?;

    info!("Ledger ready on {}", db_config.url);
    Ok(LedgerService::new(
        pool,
        Arc::new(source),
        &config,
        Arc::new(SystemClock),
    ))
}

async fn run(cli: Cli) -> Result<String, CliError> {
    let ledger = connect().await?;

    let body = match cli.command {
        Commands::Quote { symbol } => {
            let quote = ledger.get_quote(&symbol).await?;
            json!({ "success": true, "quote": quote })
        }
        Commands::Order {
            agent,
            symbol,
            side,
            shares,
            amount,
            reasoning,
        } => {
            let input = OrderInput::try_from(OrderPayload {
                symbol: Some(symbol),
                side: Some(side),
                shares,
                amount,
                reasoning,
            })?;
            let trade = ledger.place_order(&agent, input).await?;
            json!({ "success": true, "trade": trade })
        }
        Commands::Portfolio { agent } => {
            let portfolio = ledger.get_portfolio(&agent).await?;
            json!({ "success": true, "portfolio": portfolio })
        }
        Commands::Positions { agent } => {
            let positions = ledger.get_positions(&agent).await?;
            json!({ "success": true, "positions": positions })
        }
        Commands::Trades {
            agent,
            limit,
            before,
        } => {
            let trades = ledger
                .get_trades(&agent, TradeQuery { limit, before })
                .await?;
            json!({ "success": true, "trades": trades })
        }
        Commands::Feed { limit, before } => {
            let trades = ledger
                .get_recent_trades(TradeQuery { limit, before })
                .await?;
            json!({ "success": true, "trades": trades })
        }
        Commands::Closed {
            agent,
            limit,
            offset,
        } => {
            let page = ledger
                .get_closed_positions(&agent, PageRequest { limit, offset })
                .await?;
            json!({
                "success": true,
                "closed_positions": page.closed_positions,
                "total": page.total,
            })
        }
        Commands::Equity {
            agent,
            limit,
            offset,
        } => {
            let history = ledger
                .get_equity_history(&agent, PageRequest { limit, offset })
                .await?;
            json!({ "success": true, "history": history })
        }
        Commands::Leaderboard {
            sort,
            limit,
            offset,
        } => {
            let entries = ledger
                .leaderboard(sort, PageRequest { limit, offset })
                .await?;
            json!({ "success": true, "leaderboard": entries })
        }
    };

    Ok(serde_json::to_string_pretty(&body)?)
}
