//! Closed-position aggregation over an agent's trade log
//!
//! A symbol counts as closed when everything bought has been sold again. All
//! trades for the symbol are merged, so a symbol that was opened and closed
//! several times yields a single entry spanning its whole history.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::entities::order::OrderSide;
use crate::domain::entities::position::AVG_COST_SCALE;
use crate::domain::entities::trade::{ClosedPosition, ClosedPositionPage, Trade};
use crate::domain::value_objects::page::{PageRequest, CLOSED_POSITION_PAGE};
use crate::domain::value_objects::pnl::percent_of;

/// Largest bought/sold share difference still treated as flat, in 10^-4 units
const FLAT_TOLERANCE_UNITS: i64 = 1;

#[derive(Default)]
struct SymbolTotals {
    bought: BigDecimal,
    sold: BigDecimal,
    cost: BigDecimal,
    proceeds: BigDecimal,
    first_buy: Option<DateTime<Utc>>,
    last_sell: Option<DateTime<Utc>>,
}

/// Closed positions from a trade log in execution order, newest exit first
pub fn aggregate(trades: &[Trade]) -> Vec<ClosedPosition> {
    let tolerance = BigDecimal::new(FLAT_TOLERANCE_UNITS.into(), 4);
    let mut by_symbol: BTreeMap<&str, SymbolTotals> = BTreeMap::new();

    for trade in trades {
        let totals = by_symbol.entry(trade.symbol.as_str()).or_default();
        match trade.side {
            OrderSide::Buy => {
                totals.bought += trade.shares.value();
                totals.cost += &trade.total_value;
                totals.first_buy.get_or_insert(trade.created_at);
            }
            OrderSide::Sell => {
                totals.sold += trade.shares.value();
                totals.proceeds += &trade.total_value;
                totals.last_sell = Some(trade.created_at);
            }
        }
    }

    let mut closed: Vec<ClosedPosition> = by_symbol
        .into_iter()
        .filter_map(|(symbol, totals)| {
            let zero = BigDecimal::zero();
            if totals.bought <= zero || totals.sold <= zero {
                return None;
            }
            if (&totals.bought - &totals.sold).abs() > tolerance {
                return None;
            }
            let (entry_date, exit_date) = (totals.first_buy?, totals.last_sell?);

            let pnl = &totals.proceeds - &totals.cost;
            Some(ClosedPosition {
                symbol: symbol.to_string(),
                avg_entry: (&totals.cost / &totals.bought).round(AVG_COST_SCALE),
                avg_exit: (&totals.proceeds / &totals.sold).round(AVG_COST_SCALE),
                pnl_percent: percent_of(&pnl, &totals.cost),
                pnl,
                shares: totals.bought,
                total_cost: totals.cost,
                total_proceeds: totals.proceeds,
                entry_date,
                exit_date,
            })
        })
        .collect();

    closed.sort_by(|a, b| b.exit_date.cmp(&a.exit_date));
    closed
}

/// One page of [`aggregate`] plus the total number of closed positions
pub fn paginate(closed: Vec<ClosedPosition>, page: PageRequest) -> ClosedPositionPage {
    let total = closed.len();
    ClosedPositionPage {
        closed_positions: page.resolve(CLOSED_POSITION_PAGE).apply(closed),
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{price::Price, quantity::Quantity};
    use chrono::{Duration, TimeZone};
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn trade(symbol: &str, side: OrderSide, shares: f64, price: f64, minute: i64) -> Trade {
        let shares = Quantity::from_f64(shares).unwrap();
        let price = Price::from_f64(price).unwrap();
        Trade {
            id: format!("{}-{}", symbol, minute),
            agent_id: "agent-1".to_string(),
            symbol: symbol.to_string(),
            side,
            total_value: price.notional(&shares),
            shares,
            price,
            rationale: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap() + Duration::minutes(minute),
        }
    }

    #[test]
    fn test_round_trip_is_closed() {
        let trades = vec![
            trade("AAPL", OrderSide::Buy, 10.0, 100.0, 0),
            trade("AAPL", OrderSide::Buy, 5.0, 110.0, 1),
            trade("AAPL", OrderSide::Sell, 15.0, 120.0, 2),
        ];

        let closed = aggregate(&trades);
        assert_eq!(closed.len(), 1);
        let aapl = &closed[0];
        assert_eq!(aapl.shares, dec("15"));
        assert_eq!(aapl.total_cost, dec("1550"));
        assert_eq!(aapl.total_proceeds, dec("1800"));
        assert_eq!(aapl.avg_entry, dec("103.33333333"));
        assert_eq!(aapl.avg_exit, dec("120"));
        assert_eq!(aapl.pnl, dec("250"));
        assert_eq!(aapl.pnl_percent, dec("16.129"));
        assert_eq!(aapl.entry_date, trades[0].created_at);
        assert_eq!(aapl.exit_date, trades[2].created_at);
    }

    #[test]
    fn test_partially_sold_symbol_is_open() {
        let trades = vec![
            trade("MSFT", OrderSide::Buy, 10.0, 100.0, 0),
            trade("MSFT", OrderSide::Sell, 4.0, 120.0, 1),
        ];
        assert!(aggregate(&trades).is_empty());
    }

    #[test]
    fn test_residue_within_one_ten_thousandth_counts_as_flat() {
        let within = vec![
            trade("NVDA", OrderSide::Buy, 1.0001, 100.0, 0),
            trade("NVDA", OrderSide::Sell, 1.0, 100.0, 1),
        ];
        let closed = aggregate(&within);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].symbol, "NVDA");

        let beyond = vec![
            trade("NVDA", OrderSide::Buy, 1.0002, 100.0, 0),
            trade("NVDA", OrderSide::Sell, 1.0, 100.0, 1),
        ];
        assert!(aggregate(&beyond).is_empty());
    }

    #[test]
    fn test_whole_history_is_merged_per_symbol() {
        let trades = vec![
            trade("TSLA", OrderSide::Buy, 2.0, 200.0, 0),
            trade("TSLA", OrderSide::Sell, 2.0, 210.0, 1),
            trade("TSLA", OrderSide::Buy, 1.0, 250.0, 2),
            trade("TSLA", OrderSide::Sell, 1.0, 240.0, 3),
        ];
        let closed = aggregate(&trades);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].shares, dec("3"));
        assert_eq!(closed[0].pnl, dec("10"));
        assert_eq!(closed[0].entry_date, trades[0].created_at);
        assert_eq!(closed[0].exit_date, trades[3].created_at);
    }

    #[test]
    fn test_sorted_by_exit_and_paginated() {
        let trades = vec![
            trade("A", OrderSide::Buy, 1.0, 10.0, 0),
            trade("B", OrderSide::Buy, 1.0, 10.0, 1),
            trade("C", OrderSide::Buy, 1.0, 10.0, 2),
            trade("B", OrderSide::Sell, 1.0, 11.0, 3),
            trade("A", OrderSide::Sell, 1.0, 9.0, 4),
            trade("C", OrderSide::Sell, 1.0, 12.0, 5),
        ];
        let closed = aggregate(&trades);
        let symbols: Vec<&str> = closed.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["C", "A", "B"]);

        let page = paginate(closed, PageRequest::new(1, 1));
        assert_eq!(page.total, 3);
        assert_eq!(page.closed_positions.len(), 1);
        assert_eq!(page.closed_positions[0].symbol, "A");
    }

    #[test]
    fn test_sell_only_history_is_ignored() {
        let trades = vec![trade("X", OrderSide::Sell, 1.0, 10.0, 0)];
        assert!(aggregate(&trades).is_empty());
    }
}
