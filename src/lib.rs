//! Coin Rotator Library
//!
//! An unattended rotational trading engine for Binance spot markets. It holds one coin at a
//! time and jumps to another coin through a bridge asset when the price ratio between them
//! moved enough to pay for the fees, and can replay the same engine over historical candles.

pub mod backtest;
pub mod binance;
pub mod common;
pub mod config;
pub mod engine;
pub mod storage;

// Re-export commonly used types
pub use backtest::{BacktestReport, BacktestRunner, SimulatedExchange};
pub use binance::{BinanceRestClient, FeeCache, LiveExchange};
pub use common::clock::{Clock, SteppedClock, SystemClock};
pub use common::errors::{EngineError, Result};
pub use common::events::{Event, EventBus, Topic};
pub use common::notifier::{NotificationLevel, TracingNotifier};
pub use common::traits::{Exchange, Notifier, OrderApi};
pub use common::types::{
    BalanceHistory, Coin, CoinPrice, CurrentCoin, Diff, Jump, Order, OrderResult, OrderStatus,
    Pair, PairHistory, PairRatio, Side, SymbolRules,
};
pub use config::types::AppConfig;
pub use engine::{CycleOutcome, JumpFinder, TradeOutcome, Trader};
pub use storage::{MemoryRepository, Repository, SqliteRepository};
