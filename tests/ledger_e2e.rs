//! Ledger end-to-end tests
//!
//! Drive `LedgerService` the way the CLI does: scripted upstream prices, a
//! manual clock and an in-memory SQLite ledger.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use clawtrade_ledger::application::services::ledger_service::{LedgerService, TradeQuery};
use clawtrade_ledger::config::LedgerConfig;
use clawtrade_ledger::domain::entities::order::{OrderInput, OrderPayload, OrderSide};
use clawtrade_ledger::domain::entities::portfolio::LeaderboardSort;
use clawtrade_ledger::domain::errors::{OrderError, QuoteError};
use clawtrade_ledger::domain::repositories::quote_source::{MarketSnapshot, QuoteSource};
use clawtrade_ledger::domain::services::clock::ManualClock;
use clawtrade_ledger::domain::value_objects::page::PageRequest;
use clawtrade_ledger::persistence::{init_database, DatabaseConfig};

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// Upstream that serves whatever price the test last set
#[derive(Default)]
struct ScriptedSource {
    prices: Mutex<HashMap<String, f64>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn set(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let price = self.prices.lock().unwrap().get(symbol).copied();
        match price {
            Some(price) => Ok(MarketSnapshot {
                regular_market_price: Some(price),
                ..Default::default()
            }),
            None => Err(QuoteError::NotFound {
                symbol: symbol.to_string(),
            }),
        }
    }
}

struct Ledger {
    service: Arc<LedgerService>,
    source: Arc<ScriptedSource>,
    clock: Arc<ManualClock>,
}

impl Ledger {
    /// Re-price a symbol and step past the quote cache window
    fn reprice(&self, symbol: &str, price: f64) {
        self.source.set(symbol, price);
        self.tick();
    }

    fn tick(&self) {
        self.clock.advance(Duration::minutes(2));
    }

    async fn order(&self, agent: &str, input: OrderInput) -> Result<(), OrderError> {
        self.service.place_order(agent, input).await.map(|_| ())
    }
}

async fn ledger(starting_balance: &str) -> Ledger {
    let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
    let source = Arc::new(ScriptedSource::default());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap(),
    ));
    let config = LedgerConfig {
        starting_balance: dec(starting_balance),
        ..Default::default()
    };
    let service = LedgerService::new(pool, source.clone(), &config, clock.clone());

    Ledger {
        service: Arc::new(service),
        source,
        clock,
    }
}

#[tokio::test]
async fn test_round_trip_shows_up_as_closed_position() {
    let ledger = ledger("100000").await;

    ledger.reprice("AAPL", 100.0);
    ledger
        .order("agent-1", OrderInput::shares("AAPL", OrderSide::Buy, 10.0))
        .await
        .unwrap();
    ledger.reprice("AAPL", 110.0);
    ledger
        .order("agent-1", OrderInput::shares("AAPL", OrderSide::Buy, 5.0))
        .await
        .unwrap();
    ledger.reprice("AAPL", 120.0);
    ledger
        .order(
            "agent-1",
            OrderInput::shares("AAPL", OrderSide::Sell, 15.0).with_rationale("take profit"),
        )
        .await
        .unwrap();

    assert!(ledger.service.get_positions("agent-1").await.unwrap().is_empty());

    let page = ledger
        .service
        .get_closed_positions("agent-1", PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    let aapl = &page.closed_positions[0];
    assert_eq!(aapl.symbol, "AAPL");
    assert_eq!(aapl.avg_entry, dec("103.33333333"));
    assert_eq!(aapl.avg_exit, dec("120"));
    assert_eq!(aapl.pnl, dec("250"));
    assert_eq!(aapl.pnl_percent, dec("16.129"));

    let portfolio = ledger.service.get_portfolio("agent-1").await.unwrap();
    assert_eq!(portfolio.cash_balance, dec("100250"));
    assert_eq!(portfolio.total_value, dec("100250"));
    assert_eq!(portfolio.pnl, dec("250"));
    assert_eq!(portfolio.pnl_percent, dec("0.25"));
}

#[tokio::test]
async fn test_equity_history_tracks_every_order() {
    let ledger = ledger("10000").await;

    ledger.reprice("MSFT", 100.0);
    ledger
        .order("agent-1", OrderInput::shares("MSFT", OrderSide::Buy, 10.0))
        .await
        .unwrap();
    ledger.reprice("MSFT", 150.0);
    ledger
        .order("agent-1", OrderInput::shares("MSFT", OrderSide::Sell, 5.0))
        .await
        .unwrap();

    let history = ledger
        .service
        .get_equity_history("agent-1", PageRequest::default())
        .await
        .unwrap();
    let values: Vec<BigDecimal> = history.iter().map(|s| s.total_value.clone()).collect();
    // Opening balance, after the buy, after the sell marked at 150
    assert_eq!(values, vec![dec("10000"), dec("10000"), dec("10500")]);
    assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    let second_page = ledger
        .service
        .get_equity_history("agent-1", PageRequest::new(2, 1))
        .await
        .unwrap();
    assert_eq!(second_page.len(), 2);
    assert_eq!(second_page[1].total_value, dec("10500"));
}

#[tokio::test]
async fn test_trades_are_newest_first_with_cursor() {
    let ledger = ledger("100000").await;

    for (i, symbol) in ["A", "B", "C", "D"].iter().enumerate() {
        ledger.reprice(symbol, 10.0 + i as f64);
        ledger
            .order("agent-1", OrderInput::shares(symbol, OrderSide::Buy, 1.0))
            .await
            .unwrap();
    }

    let trades = ledger
        .service
        .get_trades("agent-1", TradeQuery::default())
        .await
        .unwrap();
    let symbols: Vec<&str> = trades.iter().map(|t| t.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["D", "C", "B", "A"]);

    let older = ledger
        .service
        .get_trades(
            "agent-1",
            TradeQuery {
                limit: Some(1),
                before: Some(trades[1].created_at),
            },
        )
        .await
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].symbol, "B");

    assert!(ledger
        .service
        .get_trades("agent-2", TradeQuery::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_public_feed_mixes_agents_newest_first() {
    let ledger = ledger("100000").await;

    for (agent, symbol) in [("agent-1", "AAPL"), ("agent-2", "MSFT"), ("agent-1", "TSLA")] {
        ledger.reprice(symbol, 50.0);
        ledger
            .order(agent, OrderInput::shares(symbol, OrderSide::Buy, 1.0))
            .await
            .unwrap();
    }

    let feed = ledger
        .service
        .get_recent_trades(TradeQuery::default())
        .await
        .unwrap();
    let seen: Vec<(&str, &str)> = feed
        .iter()
        .map(|t| (t.agent_id.as_str(), t.symbol.as_str()))
        .collect();
    assert_eq!(
        seen,
        vec![("agent-1", "TSLA"), ("agent-2", "MSFT"), ("agent-1", "AAPL")]
    );

    let older = ledger
        .service
        .get_recent_trades(TradeQuery {
            limit: Some(100),
            before: Some(feed[0].created_at),
        })
        .await
        .unwrap();
    assert_eq!(older.len(), 2);
    assert_eq!(older[0].symbol, "MSFT");
}

#[tokio::test]
async fn test_agent_payload_becomes_an_order() {
    let ledger = ledger("1000").await;
    ledger.reprice("NVDA", 300.0);

    let payload: OrderPayload = serde_json::from_str(
        r#"{"symbol":" nvda ","side":"BUY","amount":1000,"reasoning":"momentum"}"#,
    )
    .unwrap();
    let input = OrderInput::try_from(payload).unwrap();
    let trade = ledger.service.place_order("agent-1", input).await.unwrap();

    assert_eq!(trade.symbol, "NVDA");
    assert_eq!(trade.side, OrderSide::Buy);
    assert_eq!(trade.shares.value(), &dec("3.3333"));
    assert_eq!(trade.total_value, dec("999.99"));
    assert_eq!(trade.rationale.as_deref(), Some("momentum"));

    let portfolio = ledger.service.get_portfolio("agent-1").await.unwrap();
    assert_eq!(portfolio.cash_balance, dec("0.01"));
}

#[tokio::test]
async fn test_rejections_are_structured() {
    let ledger = ledger("100").await;
    ledger.reprice("AAPL", 15.0);

    let err = ledger
        .order("agent-1", OrderInput::shares("AAPL", OrderSide::Buy, 10.0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ERR_INSUFFICIENT_FUNDS");

    let err = ledger
        .order("agent-1", OrderInput::shares("ZZZZ", OrderSide::Buy, 1.0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ERR_QUOTE_UNAVAILABLE");
    assert!(err.is_retryable());

    let err = ledger
        .order("agent-1", OrderInput::shares("AAPL", OrderSide::Sell, 1.0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ERR_INSUFFICIENT_SHARES");

    // Nothing was ever accepted, so the agent has no ledger rows yet
    let history = ledger
        .service
        .get_equity_history("agent-1", PageRequest::default())
        .await
        .unwrap();
    assert!(history.is_empty());
    let board = ledger
        .service
        .leaderboard(LeaderboardSort::Pnl, PageRequest::default())
        .await
        .unwrap();
    assert!(board.is_empty());
}

#[tokio::test]
async fn test_quote_is_cached_within_window() {
    let ledger = ledger("1000").await;
    ledger.source.set("AAPL", 187.5);

    let first = ledger.service.get_quote("aapl").await.unwrap();
    ledger.source.set("AAPL", 190.0);
    let second = ledger.service.get_quote("AAPL").await.unwrap();
    assert_eq!(first.price, second.price);
    assert_eq!(ledger.source.calls(), 1);

    ledger.tick();
    let third = ledger.service.get_quote("AAPL").await.unwrap();
    assert_eq!(third.price.value(), &dec("190"));
    assert_eq!(ledger.source.calls(), 2);
}

#[tokio::test]
async fn test_leaderboard_ranks_agents() {
    let ledger = ledger("1000").await;
    ledger.reprice("AAPL", 100.0);
    ledger
        .order("winner", OrderInput::shares("AAPL", OrderSide::Buy, 5.0))
        .await
        .unwrap();
    ledger
        .order("loser", OrderInput::shares("AAPL", OrderSide::Buy, 1.0))
        .await
        .unwrap();
    ledger.reprice("AAPL", 50.0);
    ledger
        .order("loser", OrderInput::shares("AAPL", OrderSide::Sell, 1.0))
        .await
        .unwrap();
    ledger.reprice("AAPL", 120.0);

    let board = ledger
        .service
        .leaderboard(LeaderboardSort::Pnl, PageRequest::default())
        .await
        .unwrap();
    let agents: Vec<&str> = board.iter().map(|e| e.agent_id.as_str()).collect();
    assert_eq!(agents, vec!["winner", "loser"]);
    assert_eq!(board[0].pnl, dec("100"));
    assert_eq!(board[1].pnl, dec("-50"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buys_never_overdraw() {
    let ledger = ledger("1000").await;
    ledger.reprice("AAPL", 100.0);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = ledger.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .place_order("agent-1", OrderInput::shares("AAPL", OrderSide::Buy, 1.0))
                .await
        }));
    }

    let mut filled = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => filled += 1,
            Err(OrderError::InsufficientFunds { .. }) => rejected += 1,
            Err(other) => panic!("unexpected rejection: {:?}", other),
        }
    }
    assert_eq!(filled, 10);
    assert_eq!(rejected, 10);

    let portfolio = ledger.service.get_portfolio("agent-1").await.unwrap();
    assert_eq!(portfolio.cash_balance, dec("0"));
    let positions = ledger.service.get_positions("agent-1").await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].shares.value(), &dec("10"));

    let trades = ledger
        .service
        .get_trades("agent-1", TradeQuery::default())
        .await
        .unwrap();
    assert_eq!(trades.len(), 10);
}
