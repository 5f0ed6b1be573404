pub mod agent_locks;
pub mod clock;
pub mod closed_positions;
pub mod order_executor;
pub mod portfolio_valuator;
pub mod quote_cache;
pub mod quote_provider;
pub mod snapshot_recorder;
