pub mod order;
pub mod portfolio;
pub mod position;
pub mod quote;
pub mod trade;
