//! PortfolioValuator - marks an agent's holdings to market
//!
//! Positions are priced concurrently through the [`QuoteProvider`]. A symbol
//! whose quote fails is valued at its average cost and flagged as stale rather
//! than failing the whole valuation.

use bigdecimal::{BigDecimal, Zero};
use futures_util::future::join_all;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::domain::entities::portfolio::{
    LeaderboardEntry, LeaderboardSort, MarkToMarket, Portfolio, PositionValuation,
    PortfolioValuation,
};
use crate::domain::entities::position::Position;
use crate::domain::errors::QuoteError;
use crate::domain::services::quote_provider::QuoteProvider;
use crate::domain::value_objects::page::{PageRequest, LEADERBOARD_PAGE};
use crate::domain::value_objects::pnl::percent_of;
use crate::persistence::repository::{PortfolioRepository, PositionRepository};
use crate::persistence::{DatabaseError, DbPool};

/// Price per symbol, or the reason there is none
pub type PriceSheet = HashMap<String, Result<BigDecimal, QuoteError>>;

pub struct PortfolioValuator {
    pool: DbPool,
    quotes: Arc<QuoteProvider>,
    default_starting_balance: BigDecimal,
}

impl PortfolioValuator {
    pub fn new(pool: DbPool, quotes: Arc<QuoteProvider>, default_starting_balance: BigDecimal) -> Self {
        Self {
            pool,
            quotes,
            default_starting_balance,
        }
    }

    /// Quote every symbol concurrently. Failures are kept so the caller can
    /// fall back to cost.
    pub async fn price_sheet<'a, I>(&self, symbols: I) -> PriceSheet
    where
        I: IntoIterator<Item = &'a str>,
    {
        let symbols: Vec<&str> = symbols.into_iter().collect();
        let quotes = join_all(symbols.iter().map(|symbol| self.quotes.get_quote(symbol))).await;
        symbols
            .into_iter()
            .zip(quotes)
            .map(|(symbol, quote)| (symbol.to_string(), quote.map(|q| q.price.value().clone())))
            .collect()
    }

    /// Cash plus every position at its current price (or cost when no quote)
    pub async fn mark_to_market(&self, cash_balance: &BigDecimal, positions: &[Position]) -> MarkToMarket {
        let prices = self
            .price_sheet(positions.iter().map(|p| p.symbol.as_str()))
            .await;
        mark_with(cash_balance, positions, &prices)
    }

    /// Total value for the portfolio as seen through `conn`, priced from a
    /// sheet fetched beforehand so no quote lookup runs on the connection
    pub async fn total_value_on(
        &self,
        conn: &mut SqliteConnection,
        agent_id: &str,
        prices: &PriceSheet,
    ) -> Result<Option<BigDecimal>, DatabaseError> {
        let Some(portfolio) = PortfolioRepository::find(conn, agent_id).await? else {
            return Ok(None);
        };
        let positions = PositionRepository::list(conn, agent_id).await?;
        Ok(Some(mark_with(&portfolio.cash_balance, &positions, prices).total_value))
    }

    /// Full valuation; agents that never traded get a virtual fresh portfolio
    pub async fn get_portfolio(&self, agent_id: &str) -> Result<PortfolioValuation, DatabaseError> {
        let (portfolio, positions) = self.read_holdings(agent_id).await?;

        let (cash_balance, starting_balance) = match portfolio {
            Some(portfolio) => (portfolio.cash_balance, portfolio.starting_balance),
            None => (
                self.default_starting_balance.clone(),
                self.default_starting_balance.clone(),
            ),
        };

        let marked = self.mark_to_market(&cash_balance, &positions).await;
        Ok(valuation(marked, starting_balance))
    }

    /// Open positions ordered by symbol
    pub async fn get_positions(&self, agent_id: &str) -> Result<Vec<Position>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        PositionRepository::list(&mut conn, agent_id).await
    }

    /// Rank every persisted portfolio
    pub async fn leaderboard(
        &self,
        sort: LeaderboardSort,
        page: PageRequest,
    ) -> Result<Vec<LeaderboardEntry>, DatabaseError> {
        let holdings = {
            let mut tx = self.pool.begin().await?;
            let portfolios = PortfolioRepository::list(&mut *tx).await?;
            let mut holdings = Vec::with_capacity(portfolios.len());
            for portfolio in portfolios {
                let positions = PositionRepository::list(&mut *tx, &portfolio.agent_id).await?;
                holdings.push((portfolio, positions));
            }
            tx.commit().await?;
            holdings
        };

        let marked = join_all(
            holdings
                .iter()
                .map(|(portfolio, positions)| self.mark_to_market(&portfolio.cash_balance, positions)),
        )
        .await;

        let mut entries: Vec<LeaderboardEntry> = holdings
            .into_iter()
            .zip(marked)
            .map(|((portfolio, _), marked)| {
                let pnl = &marked.total_value - &portfolio.starting_balance;
                LeaderboardEntry {
                    pnl_percent: percent_of(&pnl, &portfolio.starting_balance),
                    pnl,
                    agent_id: portfolio.agent_id,
                    cash_balance: portfolio.cash_balance,
                    total_value: marked.total_value,
                    starting_balance: portfolio.starting_balance,
                    created_at: portfolio.created_at,
                }
            })
            .collect();

        match sort {
            LeaderboardSort::Pnl => entries.sort_by(|a, b| b.pnl.cmp(&a.pnl)),
            LeaderboardSort::Value => entries.sort_by(|a, b| b.total_value.cmp(&a.total_value)),
            LeaderboardSort::Recent => entries.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        Ok(page.resolve(LEADERBOARD_PAGE).apply(entries))
    }

    /// Portfolio row and positions from one read transaction
    async fn read_holdings(
        &self,
        agent_id: &str,
    ) -> Result<(Option<Portfolio>, Vec<Position>), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let portfolio = PortfolioRepository::find(&mut *tx, agent_id).await?;
        let positions = match portfolio {
            Some(_) => PositionRepository::list(&mut *tx, agent_id).await?,
            None => Vec::new(),
        };
        tx.commit().await?;
        Ok((portfolio, positions))
    }
}

/// Value positions from `prices`; a missing or failed quote means cost basis
pub fn mark_with(cash_balance: &BigDecimal, positions: &[Position], prices: &PriceSheet) -> MarkToMarket {
    let mut positions_value = BigDecimal::zero();
    let mut valuations = Vec::with_capacity(positions.len());

    for position in positions {
        let (current_price, price_is_stale) = match prices.get(&position.symbol) {
            Some(Ok(price)) => (price.clone(), false),
            Some(Err(e)) => {
                warn!(
                    "Valuing {} for {} at cost basis {}: {}",
                    position.symbol, position.agent_id, position.avg_cost, e
                );
                (position.avg_cost.clone(), true)
            }
            None => {
                warn!(
                    "No quote for {} held by {}, valuing at cost basis {}",
                    position.symbol, position.agent_id, position.avg_cost
                );
                (position.avg_cost.clone(), true)
            }
        };

        let value = position.shares.value() * &current_price;
        positions_value += &value;
        valuations.push(PositionValuation {
            symbol: position.symbol.clone(),
            shares: position.shares.value().clone(),
            avg_cost: position.avg_cost.clone(),
            current_price,
            value,
            price_is_stale,
        });
    }

    MarkToMarket {
        total_value: cash_balance + &positions_value,
        cash_balance: cash_balance.clone(),
        positions_value,
        positions: valuations,
    }
}

fn valuation(marked: MarkToMarket, starting_balance: BigDecimal) -> PortfolioValuation {
    let pnl = &marked.total_value - &starting_balance;
    PortfolioValuation {
        pnl_percent: percent_of(&pnl, &starting_balance),
        pnl,
        cash_balance: marked.cash_balance,
        positions_value: marked.positions_value,
        total_value: marked.total_value,
        starting_balance,
        positions: marked.positions,
    }
}
