//! Capability traits the engine is written against

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::errors::Result;
use super::notifier::NotificationLevel;
use super::types::{symbol, CancelResult, Order, OrderResult, SymbolRules};
use crate::binance::fees::{round_trip_multiplier, DEFAULT_FEE_MULTIPLIER};

/// Everything the engine needs from an exchange
///
/// Implemented by the live Binance client and by the backtest simulator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Free balances of every asset with a non-zero amount
    async fn get_balances(&self) -> Result<HashMap<String, Decimal>>;

    /// Free balance of one asset, zero when absent
    async fn get_balance(&self, coin: &str) -> Result<Decimal> {
        Ok(self
            .get_balances()
            .await?
            .get(coin)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    /// Current price of a trading symbol
    async fn get_symbol_price(&self, symbol: &str) -> Result<Decimal>;

    /// Current prices for a set of symbols
    ///
    /// Symbols the exchange rejects as invalid are reported on the event bus and left out.
    async fn get_symbol_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>>;

    /// Price of a symbol at a past instant
    async fn get_symbol_price_at(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal>;

    /// Lot-size and precision rules of a symbol
    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules>;

    /// Reload the fee table
    async fn refresh_fees(&self) -> Result<()>;

    /// Fee rate of a symbol, `FeeUnknown` until the table has it
    fn get_fee(&self, symbol: &str) -> Result<Decimal>;

    /// Round-trip fee multiplier for rotating `from` into `to` through `bridge`
    fn jump_fee_multiplier(&self, from: &str, to: &str, bridge: &str) -> Decimal {
        let sell = self.get_fee(&symbol(from, bridge));
        let buy = self.get_fee(&symbol(to, bridge));
        match (sell, buy) {
            (Ok(sell), Ok(buy)) => round_trip_multiplier(sell, buy),
            (Err(e), _) | (_, Err(e)) => {
                warn!(from, to, "Using default fee multiplier: {}", e);
                DEFAULT_FEE_MULTIPLIER
            }
        }
    }

    /// Buy `coin` with the whole `alt_coin` balance and wait for the order to finish
    async fn buy(&self, coin: &str, alt_coin: &str, cancel: &CancellationToken) -> Result<OrderResult>;

    /// Sell the whole `coin` balance for `alt_coin` and wait for the order to finish
    async fn sell(&self, coin: &str, alt_coin: &str, cancel: &CancellationToken)
        -> Result<OrderResult>;
}

/// Order status polling and cancellation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<Order>;

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<CancelResult>;
}

/// Sink for operator notifications
#[cfg_attr(test, automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotificationLevel, message: &str);
}
