//! LedgerService - the surface agents and the CLI talk to
//!
//! Wires the quote provider, valuator, snapshot recorder and order executor
//! around one database pool and one clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::LedgerConfig;
use crate::domain::entities::order::{OrderInput, TradeSummary};
use crate::domain::entities::portfolio::{
    LeaderboardEntry, LeaderboardSort, PortfolioSnapshot, PortfolioValuation,
};
use crate::domain::entities::position::Position;
use crate::domain::entities::quote::Quote;
use crate::domain::entities::trade::{ClosedPositionPage, Trade};
use crate::domain::errors::{OrderError, QuoteError};
use crate::domain::repositories::quote_source::QuoteSource;
use crate::domain::services::clock::Clock;
use crate::domain::services::closed_positions;
use crate::domain::services::order_executor::{OrderExecutor, OrderExecutorConfig};
use crate::domain::services::portfolio_valuator::PortfolioValuator;
use crate::domain::services::quote_provider::{QuoteProvider, QuoteProviderConfig};
use crate::domain::services::snapshot_recorder::SnapshotRecorder;
use crate::domain::value_objects::page::{PageRequest, EQUITY_PAGE, TRADE_FEED_PAGE, TRADE_PAGE};
use crate::persistence::repository::{SnapshotRepository, TradeRepository};
use crate::persistence::{DatabaseError, DbPool};

/// Trade listing cursor: newest first, optionally strictly before `before`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeQuery {
    pub limit: Option<u32>,
    pub before: Option<DateTime<Utc>>,
}

pub struct LedgerService {
    pool: DbPool,
    quotes: Arc<QuoteProvider>,
    valuator: Arc<PortfolioValuator>,
    executor: OrderExecutor,
}

impl LedgerService {
    pub fn new(
        pool: DbPool,
        source: Arc<dyn QuoteSource>,
        config: &LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quotes = Arc::new(QuoteProvider::new(
            source,
            QuoteProviderConfig::from(config),
            clock.clone(),
        ));
        let valuator = Arc::new(PortfolioValuator::new(
            pool.clone(),
            quotes.clone(),
            config.starting_balance.clone(),
        ));
        let snapshots = Arc::new(SnapshotRecorder::new(valuator.clone(), clock.clone()));
        let executor = OrderExecutor::new(
            pool.clone(),
            quotes.clone(),
            snapshots,
            clock,
            OrderExecutorConfig::from(config),
        );

        Self {
            pool,
            quotes,
            valuator,
            executor,
        }
    }

    pub async fn place_order(
        &self,
        agent_id: &str,
        input: OrderInput,
    ) -> Result<TradeSummary, OrderError> {
        self.executor.place_order(agent_id, input).await
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        self.quotes.get_quote(symbol).await
    }

    pub async fn get_portfolio(&self, agent_id: &str) -> Result<PortfolioValuation, DatabaseError> {
        self.valuator.get_portfolio(agent_id).await
    }

    pub async fn get_positions(&self, agent_id: &str) -> Result<Vec<Position>, DatabaseError> {
        self.valuator.get_positions(agent_id).await
    }

    /// Symbols whose buys and sells net out, newest exit first
    pub async fn get_closed_positions(
        &self,
        agent_id: &str,
        page: PageRequest,
    ) -> Result<ClosedPositionPage, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let trades = TradeRepository::list_for_agent(&mut conn, agent_id).await?;
        Ok(closed_positions::paginate(
            closed_positions::aggregate(&trades),
            page,
        ))
    }

    /// Equity curve, oldest first
    pub async fn get_equity_history(
        &self,
        agent_id: &str,
        page: PageRequest,
    ) -> Result<Vec<PortfolioSnapshot>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        SnapshotRepository::history(&mut conn, agent_id, page.resolve(EQUITY_PAGE)).await
    }

    pub async fn get_trades(
        &self,
        agent_id: &str,
        query: TradeQuery,
    ) -> Result<Vec<Trade>, DatabaseError> {
        let page = PageRequest {
            limit: query.limit,
            offset: None,
        }
        .resolve(TRADE_PAGE);
        let mut conn = self.pool.acquire().await?;
        TradeRepository::recent(&mut conn, agent_id, page.limit, query.before).await
    }

    /// Public feed of the newest trades across every agent
    pub async fn get_recent_trades(&self, query: TradeQuery) -> Result<Vec<Trade>, DatabaseError> {
        let page = PageRequest {
            limit: query.limit,
            offset: None,
        }
        .resolve(TRADE_FEED_PAGE);
        let mut conn = self.pool.acquire().await?;
        TradeRepository::recent_all(&mut conn, page.limit, query.before).await
    }

    pub async fn leaderboard(
        &self,
        sort: LeaderboardSort,
        page: PageRequest,
    ) -> Result<Vec<LeaderboardEntry>, DatabaseError> {
        self.valuator.leaderboard(sort, page).await
    }
}
