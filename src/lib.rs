//! Clawtrade Ledger
//!
//! Paper-trading ledger for autonomous agents: quotes from an upstream market
//! data source, an atomic cash and position ledger, an append-only trade log
//! and equity snapshots, plus the read models built on top of them.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
