//! OrderExecutor - validates and settles paper orders against the ledger
//!
//! The quote is resolved first and fixed for the rest of the order. Under the
//! agent's lock the other holdings are quoted for the equity snapshot, then one
//! `BEGIN IMMEDIATE` transaction does the rest with no network I/O: lazy
//! portfolio creation, the cash and position changes, the trade row and the
//! equity snapshot commit together or not at all.

use bigdecimal::BigDecimal;
use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::domain::entities::order::{OrderInput, OrderRequest, OrderSide, TradeSummary};
use crate::domain::entities::portfolio::Portfolio;
use crate::domain::entities::position::Position;
use crate::domain::entities::trade::Trade;
use crate::domain::errors::{OrderError, ValidationError};
use crate::domain::services::agent_locks::AgentLocks;
use crate::domain::services::clock::Clock;
use crate::domain::services::portfolio_valuator::PriceSheet;
use crate::domain::services::quote_provider::QuoteProvider;
use crate::domain::services::snapshot_recorder::SnapshotRecorder;
use crate::domain::value_objects::symbol::Symbol;
use crate::persistence::models::generate_id;
use crate::persistence::repository::{PortfolioRepository, PositionRepository, TradeRepository};
use crate::persistence::{DatabaseError, DbPool, WriteTransaction};

/// Order execution configuration
#[derive(Debug, Clone)]
pub struct OrderExecutorConfig {
    pub starting_balance: BigDecimal,
    pub max_conflict_retries: u32,
    pub conflict_backoff: Duration,
}

impl Default for OrderExecutorConfig {
    fn default() -> Self {
        OrderExecutorConfig::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for OrderExecutorConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            starting_balance: config.starting_balance.clone(),
            max_conflict_retries: config.max_conflict_retries,
            conflict_backoff: config.conflict_backoff,
        }
    }
}

pub struct OrderExecutor {
    pool: DbPool,
    quotes: Arc<QuoteProvider>,
    snapshots: Arc<SnapshotRecorder>,
    locks: AgentLocks,
    clock: Arc<dyn Clock>,
    config: OrderExecutorConfig,
}

impl OrderExecutor {
    pub fn new(
        pool: DbPool,
        quotes: Arc<QuoteProvider>,
        snapshots: Arc<SnapshotRecorder>,
        clock: Arc<dyn Clock>,
        config: OrderExecutorConfig,
    ) -> Self {
        Self {
            pool,
            quotes,
            snapshots,
            locks: AgentLocks::new(),
            clock,
            config,
        }
    }

    /// Validate, price and settle one order for `agent_id`
    pub async fn place_order(
        &self,
        agent_id: &str,
        input: OrderInput,
    ) -> Result<TradeSummary, OrderError> {
        let request = self.prepare(agent_id, input).await?;

        let _guard = self.locks.acquire(&request.agent_id).await;
        let prices = self.snapshot_prices(&request).await?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.execute(&request, &prices).await {
                Ok(trade) => {
                    info!(
                        "Executed {} {} {} @ {} for {} (total {})",
                        trade.side,
                        trade.shares,
                        trade.symbol,
                        trade.price,
                        trade.agent_id,
                        trade.total_value
                    );
                    return Ok(trade.summary());
                }
                Err(OrderError::PersistenceConflict { .. })
                    if attempt <= self.config.max_conflict_retries =>
                {
                    let backoff = self.config.conflict_backoff * attempt;
                    warn!(
                        "Write conflict on {} order for {} (attempt {}), retrying in {:?}",
                        request.symbol, request.agent_id, attempt, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(OrderError::PersistenceConflict { .. }) => {
                    warn!(
                        "Giving up on {} order for {} after {} attempts",
                        request.symbol, request.agent_id, attempt
                    );
                    return Err(OrderError::PersistenceConflict { attempts: attempt });
                }
                Err(e) => {
                    debug!("Order for {} rejected: {}", request.agent_id, e);
                    return Err(e);
                }
            }
        }
    }

    /// Everything that can be checked before touching the ledger
    async fn prepare(&self, agent_id: &str, input: OrderInput) -> Result<OrderRequest, OrderError> {
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(ValidationError::EmptyAgentId.into());
        }

        let symbol = Symbol::parse(&input.symbol)?;
        let side: OrderSide = input.side.parse()?;

        let quote = self.quotes.get_quote(symbol.as_str()).await?;
        let shares = input.quantity.resolve(&quote.price)?;

        debug!(
            "Prepared {} {} {} @ {} for {}",
            side, shares, symbol, quote.price, agent_id
        );

        Ok(OrderRequest {
            agent_id: agent_id.to_string(),
            symbol,
            side,
            shares,
            price: quote.price,
            rationale: input.rationale,
        })
    }

    /// Quotes the equity snapshot will use, fetched before the write lock is taken
    async fn snapshot_prices(&self, request: &OrderRequest) -> Result<PriceSheet, OrderError> {
        let held = {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| DatabaseError::from_query("Failed to acquire connection", e))?;
            PositionRepository::list(&mut conn, &request.agent_id).await?
        };
        Ok(self
            .snapshots
            .price_sheet(&held, (request.symbol.as_str(), &request.price))
            .await)
    }

    /// One attempt at the atomic unit; any error rolls everything back
    async fn execute(&self, request: &OrderRequest, prices: &PriceSheet) -> Result<Trade, OrderError> {
        let mut tx = WriteTransaction::begin(&self.pool).await?;

        match self.settle(tx.connection()?, request, prices).await {
            Ok(trade) => {
                tx.commit().await?;
                Ok(trade)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback for {} failed: {}", request.agent_id, rollback);
                }
                Err(e)
            }
        }
    }

    async fn settle(
        &self,
        conn: &mut SqliteConnection,
        request: &OrderRequest,
        prices: &PriceSheet,
    ) -> Result<Trade, OrderError> {
        let now = self.clock.now();
        let agent_id = request.agent_id.as_str();
        let symbol = request.symbol.as_str();

        let portfolio = self.ensure_portfolio(conn, agent_id).await?;
        let notional = request.notional();
        let existing = PositionRepository::find(conn, agent_id, symbol).await?;

        let cash_balance = match request.side {
            OrderSide::Buy => {
                if notional > portfolio.cash_balance {
                    return Err(OrderError::InsufficientFunds {
                        required: notional,
                        available: portfolio.cash_balance,
                    });
                }
                let next = match &existing {
                    Some(position) => position.after_buy(&request.shares, &request.price, now)?,
                    None => Position::open(agent_id, symbol, request.shares.clone(), &request.price, now),
                };
                PositionRepository::upsert_on_buy(conn, existing.as_ref(), &next).await?;
                &portfolio.cash_balance - &notional
            }
            OrderSide::Sell => {
                let position = match existing {
                    Some(position) if position.shares >= request.shares => position,
                    other => {
                        return Err(OrderError::InsufficientShares {
                            symbol: symbol.to_string(),
                            requested: request.shares.value().clone(),
                            held: other
                                .map(|p| p.shares.value().clone())
                                .unwrap_or_default(),
                        });
                    }
                };
                let outcome = position.after_sell(&request.shares)?;
                PositionRepository::reduce_or_delete(conn, &position, &outcome, now).await?;
                &portfolio.cash_balance + &notional
            }
        };

        PortfolioRepository::update_cash(conn, agent_id, &portfolio.cash_balance, &cash_balance, now)
            .await?;

        let trade = Trade {
            id: generate_id(),
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            side: request.side,
            shares: request.shares.clone(),
            price: request.price.clone(),
            total_value: notional,
            rationale: request.rationale.clone(),
            created_at: now,
        };
        TradeRepository::append(conn, &trade).await?;

        self.snapshots.record(conn, agent_id, prices).await?;

        Ok(trade)
    }

    /// Existing portfolio, or a new one at the starting balance with its opening snapshot
    async fn ensure_portfolio(
        &self,
        conn: &mut SqliteConnection,
        agent_id: &str,
    ) -> Result<Portfolio, OrderError> {
        if let Some(portfolio) = PortfolioRepository::find(conn, agent_id).await? {
            return Ok(portfolio);
        }

        let now = self.clock.now();
        let portfolio = Portfolio {
            agent_id: agent_id.to_string(),
            cash_balance: self.config.starting_balance.clone(),
            starting_balance: self.config.starting_balance.clone(),
            created_at: now,
            updated_at: now,
        };
        PortfolioRepository::create(conn, &portfolio).await?;
        self.snapshots
            .record_value(conn, agent_id, portfolio.starting_balance.clone())
            .await?;

        info!(
            "Opened portfolio for {} with {}",
            agent_id, portfolio.starting_balance
        );
        Ok(portfolio)
    }
}
