//! Database Repository
//!
//! Data access for portfolios, positions, trades and snapshots. Every method
//! takes a `&mut SqliteConnection`, which is either a pooled connection or the
//! connection behind an open `Transaction`.
//!
//! Mutations of existing rows are compare-and-set against the value the caller
//! read earlier. A guard that matches no row means someone else wrote first and
//! surfaces as [`DatabaseError::Conflict`].

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use super::models::*;
use super::DatabaseError;
use crate::domain::entities::portfolio::{Portfolio, PortfolioSnapshot};
use crate::domain::entities::position::{Position, SellOutcome};
use crate::domain::entities::trade::Trade;
use crate::domain::value_objects::page::Page;

/// Portfolio repository
pub struct PortfolioRepository;

impl PortfolioRepository {
    /// Get the portfolio row for an agent
    pub async fn find(
        conn: &mut SqliteConnection,
        agent_id: &str,
    ) -> Result<Option<Portfolio>, DatabaseError> {
        let record = sqlx::query_as::<_, PortfolioRecord>(
            "SELECT * FROM portfolios WHERE agent_id = ?1",
        )
        .bind(agent_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to get portfolio", e))?;

        record.map(Portfolio::try_from).transpose()
    }

    /// Insert a new portfolio; an existing row for the agent is a conflict
    pub async fn create(
        conn: &mut SqliteConnection,
        portfolio: &Portfolio,
    ) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO portfolios (agent_id, cash_balance, starting_balance, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(agent_id) DO NOTHING
            "#,
        )
        .bind(&portfolio.agent_id)
        .bind(portfolio.cash_balance.to_string())
        .bind(portfolio.starting_balance.to_string())
        .bind(portfolio.created_at)
        .bind(portfolio.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to create portfolio", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::Conflict(format!(
                "Portfolio already exists: {}",
                portfolio.agent_id
            )));
        }

        debug!(
            "Created portfolio for {} with {}",
            portfolio.agent_id, portfolio.starting_balance
        );
        Ok(())
    }

    /// Set the cash balance, guarded on the balance the caller read
    pub async fn update_cash(
        conn: &mut SqliteConnection,
        agent_id: &str,
        expected: &BigDecimal,
        cash_balance: &BigDecimal,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE portfolios
            SET cash_balance = ?1, updated_at = ?2
            WHERE agent_id = ?3 AND cash_balance = ?4
            "#,
        )
        .bind(cash_balance.to_string())
        .bind(now)
        .bind(agent_id)
        .bind(expected.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to update cash balance", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::Conflict(format!(
                "Cash balance for {} changed concurrently",
                agent_id
            )));
        }

        debug!("Cash balance for {}: {} -> {}", agent_id, expected, cash_balance);
        Ok(())
    }

    /// All portfolios, oldest first
    pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Portfolio>, DatabaseError> {
        let records = sqlx::query_as::<_, PortfolioRecord>(
            "SELECT * FROM portfolios ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to list portfolios", e))?;

        into_domain(records)
    }
}

/// Position repository
pub struct PositionRepository;

impl PositionRepository {
    /// Get one open position
    pub async fn find(
        conn: &mut SqliteConnection,
        agent_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, DatabaseError> {
        let record = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE agent_id = ?1 AND symbol = ?2",
        )
        .bind(agent_id)
        .bind(symbol)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to get position", e))?;

        record.map(Position::try_from).transpose()
    }

    /// All open positions of an agent, ordered by symbol
    pub async fn list(
        conn: &mut SqliteConnection,
        agent_id: &str,
    ) -> Result<Vec<Position>, DatabaseError> {
        let records = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE agent_id = ?1 ORDER BY symbol ASC",
        )
        .bind(agent_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to list positions", e))?;

        into_domain(records)
    }

    /// Write the position that results from a buy.
    ///
    /// With no `previous` the row is inserted; otherwise it is updated only if
    /// the stored share count still equals `previous.shares`.
    pub async fn upsert_on_buy(
        conn: &mut SqliteConnection,
        previous: Option<&Position>,
        next: &Position,
    ) -> Result<(), DatabaseError> {
        let rows_affected = match previous {
            None => sqlx::query(
                r#"
                INSERT INTO positions (agent_id, symbol, shares, avg_cost, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(agent_id, symbol) DO NOTHING
                "#,
            )
            .bind(&next.agent_id)
            .bind(&next.symbol)
            .bind(next.shares.value().to_string())
            .bind(next.avg_cost.to_string())
            .bind(next.created_at)
            .bind(next.updated_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::from_query("Failed to insert position", e))?
            .rows_affected(),
            Some(previous) => sqlx::query(
                r#"
                UPDATE positions
                SET shares = ?1, avg_cost = ?2, updated_at = ?3
                WHERE agent_id = ?4 AND symbol = ?5 AND shares = ?6
                "#,
            )
            .bind(next.shares.value().to_string())
            .bind(next.avg_cost.to_string())
            .bind(next.updated_at)
            .bind(&next.agent_id)
            .bind(&next.symbol)
            .bind(previous.shares.value().to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::from_query("Failed to update position", e))?
            .rows_affected(),
        };

        if rows_affected == 0 {
            return Err(DatabaseError::Conflict(format!(
                "Position {}/{} changed concurrently",
                next.agent_id, next.symbol
            )));
        }

        debug!(
            "Position {}/{}: {} @ {}",
            next.agent_id, next.symbol, next.shares, next.avg_cost
        );
        Ok(())
    }

    /// Apply a sell: shrink the row, or delete it once nothing is left
    pub async fn reduce_or_delete(
        conn: &mut SqliteConnection,
        previous: &Position,
        outcome: &SellOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let expected = previous.shares.value().to_string();

        let rows_affected = match outcome {
            SellOutcome::Reduced(remaining) => sqlx::query(
                r#"
                UPDATE positions
                SET shares = ?1, updated_at = ?2
                WHERE agent_id = ?3 AND symbol = ?4 AND shares = ?5
                "#,
            )
            .bind(remaining.value().to_string())
            .bind(now)
            .bind(&previous.agent_id)
            .bind(&previous.symbol)
            .bind(&expected)
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::from_query("Failed to reduce position", e))?
            .rows_affected(),
            SellOutcome::Closed => sqlx::query(
                "DELETE FROM positions WHERE agent_id = ?1 AND symbol = ?2 AND shares = ?3",
            )
            .bind(&previous.agent_id)
            .bind(&previous.symbol)
            .bind(&expected)
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::from_query("Failed to delete position", e))?
            .rows_affected(),
        };

        if rows_affected == 0 {
            return Err(DatabaseError::Conflict(format!(
                "Position {}/{} changed concurrently",
                previous.agent_id, previous.symbol
            )));
        }

        match outcome {
            SellOutcome::Reduced(remaining) => debug!(
                "Position {}/{} reduced to {}",
                previous.agent_id, previous.symbol, remaining
            ),
            SellOutcome::Closed => {
                debug!("Position {}/{} closed", previous.agent_id, previous.symbol)
            }
        }
        Ok(())
    }
}

/// Trade repository (append-only)
pub struct TradeRepository;

impl TradeRepository {
    /// Record an executed trade
    pub async fn append(conn: &mut SqliteConnection, trade: &Trade) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, agent_id, symbol, side, shares, price, total_value, reasoning, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.agent_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.shares.value().to_string())
        .bind(trade.price.value().to_string())
        .bind(trade.total_value.to_string())
        .bind(&trade.rationale)
        .bind(trade.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to append trade", e))?;

        debug!(
            "Recorded trade {}: {} {} {} @ {}",
            trade.id, trade.side, trade.shares, trade.symbol, trade.price
        );
        Ok(())
    }

    /// The agent's complete trade log in execution order
    pub async fn list_for_agent(
        conn: &mut SqliteConnection,
        agent_id: &str,
    ) -> Result<Vec<Trade>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE agent_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(agent_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to list trades", e))?;

        into_domain(records)
    }

    /// Newest trades first, optionally only those strictly before a timestamp
    pub async fn recent(
        conn: &mut SqliteConnection,
        agent_id: &str,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Trade>, DatabaseError> {
        let records = match before {
            Some(before) => sqlx::query_as::<_, TradeRecord>(
                r#"
                SELECT * FROM trades
                WHERE agent_id = ?1 AND created_at < ?2
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?3
                "#,
            )
            .bind(agent_id)
            .bind(before)
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await,
            None => sqlx::query_as::<_, TradeRecord>(
                r#"
                SELECT * FROM trades
                WHERE agent_id = ?1
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?2
                "#,
            )
            .bind(agent_id)
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await,
        }
        .map_err(|e| DatabaseError::from_query("Failed to get recent trades", e))?;

        into_domain(records)
    }

    /// Newest trades across every agent
    pub async fn recent_all(
        conn: &mut SqliteConnection,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Trade>, DatabaseError> {
        let records = match before {
            Some(before) => sqlx::query_as::<_, TradeRecord>(
                r#"
                SELECT * FROM trades
                WHERE created_at < ?1
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?2
                "#,
            )
            .bind(before)
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await,
            None => sqlx::query_as::<_, TradeRecord>(
                r#"
                SELECT * FROM trades
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?1
                "#,
            )
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await,
        }
        .map_err(|e| DatabaseError::from_query("Failed to get trade feed", e))?;

        into_domain(records)
    }
}

/// Portfolio snapshot repository (append-only)
pub struct SnapshotRepository;

impl SnapshotRepository {
    pub async fn append(
        conn: &mut SqliteConnection,
        snapshot: &PortfolioSnapshot,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots (id, agent_id, total_value, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.agent_id)
        .bind(snapshot.total_value.to_string())
        .bind(snapshot.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to append snapshot", e))?;

        debug!(
            "Snapshot for {}: {} at {}",
            snapshot.agent_id, snapshot.total_value, snapshot.created_at
        );
        Ok(())
    }

    /// Equity curve, oldest first
    pub async fn history(
        conn: &mut SqliteConnection,
        agent_id: &str,
        page: Page,
    ) -> Result<Vec<PortfolioSnapshot>, DatabaseError> {
        let records = sqlx::query_as::<_, SnapshotRecord>(
            r#"
            SELECT * FROM portfolio_snapshots
            WHERE agent_id = ?1
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(agent_id)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to get snapshot history", e))?;

        into_domain(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::OrderSide;
    use crate::domain::value_objects::{price::Price, quantity::Quantity};
    use crate::persistence::{init_database, DatabaseConfig, DbPool};
    use chrono::Duration;
    use std::str::FromStr;

    async fn setup() -> DbPool {
        init_database(&DatabaseConfig::in_memory()).await.unwrap()
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn portfolio(agent_id: &str, cash: &str) -> Portfolio {
        let now = Utc::now();
        Portfolio {
            agent_id: agent_id.to_string(),
            cash_balance: dec(cash),
            starting_balance: dec("100000"),
            created_at: now,
            updated_at: now,
        }
    }

    fn trade(agent_id: &str, symbol: &str, side: OrderSide, at: DateTime<Utc>) -> Trade {
        let shares = Quantity::from_f64(1.0).unwrap();
        let price = Price::from_f64(10.0).unwrap();
        Trade {
            id: generate_id(),
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            side,
            total_value: price.notional(&shares),
            shares,
            price,
            rationale: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_portfolio_create_and_find() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        PortfolioRepository::create(&mut conn, &portfolio("agent-1", "100000"))
            .await
            .unwrap();
        let found = PortfolioRepository::find(&mut conn, "agent-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.cash_balance, dec("100000"));

        assert!(PortfolioRepository::find(&mut conn, "nobody")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_portfolio_is_conflict() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        PortfolioRepository::create(&mut conn, &portfolio("agent-1", "100000"))
            .await
            .unwrap();
        let result = PortfolioRepository::create(&mut conn, &portfolio("agent-1", "5")).await;
        assert!(matches!(result, Err(DatabaseError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cash_update_is_compare_and_set() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        PortfolioRepository::create(&mut conn, &portfolio("agent-1", "1000"))
            .await
            .unwrap();

        PortfolioRepository::update_cash(&mut conn, "agent-1", &dec("1000"), &dec("850.5"), Utc::now())
            .await
            .unwrap();

        let stale = PortfolioRepository::update_cash(
            &mut conn,
            "agent-1",
            &dec("1000"),
            &dec("1"),
            Utc::now(),
        )
        .await;
        assert!(matches!(stale, Err(DatabaseError::Conflict(_))));

        let found = PortfolioRepository::find(&mut conn, "agent-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.cash_balance, dec("850.5"));
    }

    #[tokio::test]
    async fn test_position_lifecycle() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        PortfolioRepository::create(&mut conn, &portfolio("agent-1", "1000"))
            .await
            .unwrap();

        let now = Utc::now();
        let opened = Position::open(
            "agent-1",
            "AAPL",
            Quantity::from_f64(10.0).unwrap(),
            &Price::from_f64(100.0).unwrap(),
            now,
        );
        PositionRepository::upsert_on_buy(&mut conn, None, &opened)
            .await
            .unwrap();

        let grown = opened
            .after_buy(
                &Quantity::from_f64(5.0).unwrap(),
                &Price::from_f64(110.0).unwrap(),
                now,
            )
            .unwrap();
        PositionRepository::upsert_on_buy(&mut conn, Some(&opened), &grown)
            .await
            .unwrap();

        let stored = PositionRepository::find(&mut conn, "agent-1", "AAPL")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.shares.value(), &dec("15"));
        assert_eq!(stored.avg_cost, dec("103.33333333"));

        // A second write based on the stale row must lose
        let replay = PositionRepository::upsert_on_buy(&mut conn, Some(&opened), &grown).await;
        assert!(matches!(replay, Err(DatabaseError::Conflict(_))));

        PositionRepository::reduce_or_delete(&mut conn, &stored, &SellOutcome::Closed, now)
            .await
            .unwrap();
        assert!(PositionRepository::find(&mut conn, "agent-1", "AAPL")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_positions_listed_by_symbol() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        PortfolioRepository::create(&mut conn, &portfolio("agent-1", "1000"))
            .await
            .unwrap();

        for symbol in ["MSFT", "AAPL", "NVDA"] {
            let position = Position::open(
                "agent-1",
                symbol,
                Quantity::from_f64(1.0).unwrap(),
                &Price::from_f64(1.0).unwrap(),
                Utc::now(),
            );
            PositionRepository::upsert_on_buy(&mut conn, None, &position)
                .await
                .unwrap();
        }

        let symbols: Vec<String> = PositionRepository::list(&mut conn, "agent-1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.symbol)
            .collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "NVDA"]);
    }

    #[tokio::test]
    async fn test_trade_ordering() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        PortfolioRepository::create(&mut conn, &portfolio("agent-1", "1000"))
            .await
            .unwrap();

        let start = Utc::now();
        let first = trade("agent-1", "AAPL", OrderSide::Buy, start);
        let second = trade("agent-1", "AAPL", OrderSide::Sell, start + Duration::seconds(1));
        let third = trade("agent-1", "MSFT", OrderSide::Buy, start + Duration::seconds(2));
        for t in [&first, &second, &third] {
            TradeRepository::append(&mut conn, t).await.unwrap();
        }

        let ascending = TradeRepository::list_for_agent(&mut conn, "agent-1")
            .await
            .unwrap();
        assert_eq!(ascending[0].id, first.id);
        assert_eq!(ascending[2].id, third.id);

        let newest = TradeRepository::recent(&mut conn, "agent-1", 2, None)
            .await
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].id, third.id);

        let older = TradeRepository::recent(&mut conn, "agent-1", 10, Some(third.created_at))
            .await
            .unwrap();
        assert_eq!(older.len(), 2);
        assert_eq!(older[0].id, second.id);
    }

    #[tokio::test]
    async fn test_trade_feed_spans_agents() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        for agent in ["agent-1", "agent-2"] {
            PortfolioRepository::create(&mut conn, &portfolio(agent, "1000"))
                .await
                .unwrap();
        }

        let start = Utc::now();
        let first = trade("agent-1", "AAPL", OrderSide::Buy, start);
        let second = trade("agent-2", "TSLA", OrderSide::Buy, start + Duration::seconds(1));
        let third = trade("agent-1", "AAPL", OrderSide::Sell, start + Duration::seconds(2));
        for t in [&first, &second, &third] {
            TradeRepository::append(&mut conn, t).await.unwrap();
        }

        let feed = TradeRepository::recent_all(&mut conn, 10, None).await.unwrap();
        let ids: Vec<&str> = feed.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);

        let page = TradeRepository::recent_all(&mut conn, 1, Some(third.created_at))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].agent_id, "agent-2");
    }

    #[tokio::test]
    async fn test_snapshot_history_paginates_ascending() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        PortfolioRepository::create(&mut conn, &portfolio("agent-1", "1000"))
            .await
            .unwrap();

        let start = Utc::now();
        for i in 0..5 {
            let snapshot = PortfolioSnapshot {
                id: generate_id(),
                agent_id: "agent-1".to_string(),
                total_value: BigDecimal::from(1000 + i),
                created_at: start + Duration::seconds(i),
            };
            SnapshotRepository::append(&mut conn, &snapshot).await.unwrap();
        }

        let page = SnapshotRepository::history(&mut conn, "agent-1", Page { limit: 2, offset: 1 })
            .await
            .unwrap();
        let values: Vec<BigDecimal> = page.into_iter().map(|s| s.total_value).collect();
        assert_eq!(values, vec![BigDecimal::from(1001), BigDecimal::from(1002)]);
    }
}
