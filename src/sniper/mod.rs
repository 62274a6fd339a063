pub mod executor;
pub mod fleet;
pub mod position;

pub use executor::{TradeAccounts, TradeExecutor};
pub use fleet::{FleetStats, PositionConfig, PositionEvent, SniperManager};
pub use position::{Position, PositionHandle, PositionState};
