//! Historical replay: simulated exchange and the stepped runner

pub mod exchange;
pub mod runner;

pub use exchange::SimulatedExchange;
pub use runner::{BacktestReport, BacktestRunner};
