//! SnapshotRecorder - appends points to an agent's equity curve

use bigdecimal::BigDecimal;
use sqlx::SqliteConnection;
use std::sync::Arc;

use crate::domain::entities::portfolio::PortfolioSnapshot;
use crate::domain::entities::position::Position;
use crate::domain::services::clock::Clock;
use crate::domain::services::portfolio_valuator::{PortfolioValuator, PriceSheet};
use crate::domain::value_objects::price::Price;
use crate::persistence::models::generate_id;
use crate::persistence::repository::SnapshotRepository;
use crate::persistence::DatabaseError;

pub struct SnapshotRecorder {
    valuator: Arc<PortfolioValuator>,
    clock: Arc<dyn Clock>,
}

impl SnapshotRecorder {
    pub fn new(valuator: Arc<PortfolioValuator>, clock: Arc<dyn Clock>) -> Self {
        Self { valuator, clock }
    }

    /// Snapshot with a known total, e.g. the opening balance of a new portfolio
    pub async fn record_value(
        &self,
        conn: &mut SqliteConnection,
        agent_id: &str,
        total_value: BigDecimal,
    ) -> Result<PortfolioSnapshot, DatabaseError> {
        let snapshot = PortfolioSnapshot {
            id: generate_id(),
            agent_id: agent_id.to_string(),
            total_value,
            created_at: self.clock.now(),
        };
        SnapshotRepository::append(conn, &snapshot).await?;
        Ok(snapshot)
    }

    /// Quotes for every `held` symbol plus the traded one, whose price is
    /// already known. Run before the write transaction opens.
    pub async fn price_sheet(&self, held: &[Position], traded: (&str, &Price)) -> PriceSheet {
        let (traded_symbol, traded_price) = traded;
        let mut prices = self
            .valuator
            .price_sheet(
                held.iter()
                    .map(|p| p.symbol.as_str())
                    .filter(|symbol| *symbol != traded_symbol),
            )
            .await;
        prices.insert(traded_symbol.to_string(), Ok(traded_price.value().clone()));
        prices
    }

    /// Value the portfolio as `conn` currently sees it at `prices` and append
    /// the result. Returns `None` when the agent has no portfolio.
    pub async fn record(
        &self,
        conn: &mut SqliteConnection,
        agent_id: &str,
        prices: &PriceSheet,
    ) -> Result<Option<PortfolioSnapshot>, DatabaseError> {
        let Some(total_value) = self.valuator.total_value_on(conn, agent_id, prices).await? else {
            return Ok(None);
        };
        self.record_value(conn, agent_id, total_value).await.map(Some)
    }
}
