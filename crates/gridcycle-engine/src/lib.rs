/*
[INPUT]:  Public API exports for the gridcycle engine crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod admin;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod grid;
pub mod model;
pub mod store;
pub mod supervisor;
pub mod trading;

// Re-export main types for convenience
pub use admin::{AdminCommands, BotPatch};
pub use config::AppConfig;
pub use error::{EngineError, Result};
pub use gateway::ExchangeGateway;
pub use grid::FilterTable;
pub use model::{Bot, BotStatus, CycleProfit, CycleStatus, Order, TradingCycle};
pub use store::Database;
pub use supervisor::{BinanceConnector, BotConnector, BotSupervisor};
pub use trading::TradingService;
