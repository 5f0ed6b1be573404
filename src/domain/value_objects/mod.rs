pub mod page;
pub mod pnl;
pub mod price;
pub mod quantity;
pub mod symbol;
