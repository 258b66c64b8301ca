//! Exchange replaying historical candles with instant fills
//!
//! Prices come from candles fetched in windows and cached per symbol. Orders fill immediately
//! at the replayed price, the default fee is taken from the received asset, and lot-size
//! rules come from the live exchange so quantities match what the real market would accept.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binance::fees::DEFAULT_FEE;
use crate::binance::messages::Kline;
use crate::binance::LiveExchange;
use crate::common::clock::Clock;
use crate::common::errors::{EngineError, Result};
use crate::common::traits::Exchange;
use crate::common::types::{
    step_size_format, symbol, Order, OrderResult, OrderStatus, Side, SymbolRules,
};
use crate::config::types::BacktestConfig;

/// Candles of one symbol keyed by open time
type CandleSeries = BTreeMap<DateTime<Utc>, Kline>;

/// Price of the candle enclosing `at`
fn candle_price_at(series: &CandleSeries, at: DateTime<Utc>) -> Option<Decimal> {
    series
        .range(..=at)
        .next_back()
        .filter(|(_, k)| at < k.close_time)
        .map(|(_, k)| k.mid_price())
}

pub struct SimulatedExchange {
    live: LiveExchange,
    clock: Arc<dyn Clock>,
    bridge: String,
    kline_interval: String,
    window: u32,
    balances: Mutex<HashMap<String, Decimal>>,
    candles: RwLock<HashMap<String, CandleSeries>>,
    next_order_id: AtomicI64,
}

impl SimulatedExchange {
    pub fn new(
        live: LiveExchange,
        clock: Arc<dyn Clock>,
        bridge: impl Into<String>,
        config: &BacktestConfig,
    ) -> Self {
        let bridge = bridge.into();
        let balances = HashMap::from([(bridge.clone(), config.initial_balance)]);
        Self {
            live,
            clock,
            bridge,
            kline_interval: config.kline_interval.clone(),
            window: config.window_minutes.max(1),
            balances: Mutex::new(balances),
            candles: RwLock::new(HashMap::new()),
            next_order_id: AtomicI64::new(1),
        }
    }

    /// Balances after the replay so far
    pub fn balances(&self) -> HashMap<String, Decimal> {
        self.balances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Fetch the candle window starting at the minute of `at`
    async fn load_window(&self, symbol: &str, at: DateTime<Utc>) -> Result<()> {
        let start = at
            .duration_trunc(chrono::Duration::minutes(1))
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let klines = self
            .live
            .rest()
            .get_klines(symbol, &self.kline_interval, start, self.window)
            .await?;
        debug!(symbol, %start, count = klines.len(), "Loaded candle window");

        let mut candles = self.candles.write().await;
        let series = candles.entry(symbol.to_string()).or_default();
        for kline in klines {
            series.insert(kline.open_time, kline);
        }
        Ok(())
    }

    async fn cached_price_at(&self, symbol: &str, at: DateTime<Utc>) -> Option<Decimal> {
        self.candles
            .read()
            .await
            .get(symbol)
            .and_then(|series| candle_price_at(series, at))
    }

    fn fill(&self, coin: &str, side: Side, price: Decimal, step: Decimal) -> Result<OrderResult> {
        let sym = symbol(coin, &self.bridge);
        let fee_kept = Decimal::ONE - DEFAULT_FEE;
        let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        let coin_balance = balances.get(coin).copied().unwrap_or(Decimal::ZERO);
        let bridge_balance = balances.get(&self.bridge).copied().unwrap_or(Decimal::ZERO);

        let quantity = match side {
            Side::Sell => step_size_format(coin_balance, step),
            Side::Buy => step_size_format(
                bridge_balance.checked_div(price).unwrap_or(Decimal::ZERO),
                step,
            ),
        };
        if quantity.is_zero() {
            return Err(EngineError::InsufficientData(format!(
                "nothing to {} on {}: {} {}, {} {}",
                side, sym, coin_balance, coin, bridge_balance, self.bridge
            )));
        }

        let (coin_after, bridge_after) = match side {
            Side::Sell => (
                coin_balance - quantity,
                bridge_balance + quantity * fee_kept * price,
            ),
            Side::Buy => (
                coin_balance + quantity * fee_kept,
                bridge_balance - quantity * price,
            ),
        };
        balances.insert(coin.to_string(), coin_after);
        balances.insert(self.bridge.clone(), bridge_after);

        info!(
            "Simulated {} of {} {} at price {}, now {} {} and {} {}",
            side, quantity, coin, price, coin_after, coin, bridge_after, self.bridge
        );

        Ok(OrderResult::filled(Order {
            symbol: sym,
            order_id: self.next_order_id.fetch_add(1, Ordering::Relaxed),
            status: OrderStatus::Filled,
            price,
            orig_quantity: quantity,
            executed_quantity: quantity,
            time: self.clock.now(),
        }))
    }

    async fn trade(&self, coin: &str, alt_coin: &str, side: Side) -> Result<OrderResult> {
        if alt_coin != self.bridge {
            return Err(EngineError::SymbolNotFound(symbol(coin, alt_coin)));
        }
        let sym = symbol(coin, alt_coin);
        let price = self.get_symbol_price(&sym).await?;
        let rules = self.live.get_symbol_rules(&sym).await?;
        self.fill(coin, side, price, rules.step_size)
    }
}

#[async_trait]
impl Exchange for SimulatedExchange {
    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        Ok(self
            .balances()
            .into_iter()
            .filter(|(_, amount)| !amount.is_zero())
            .collect())
    }

    async fn get_symbol_price(&self, symbol: &str) -> Result<Decimal> {
        self.get_symbol_price_at(symbol, self.clock.now()).await
    }

    async fn get_symbol_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut prices = HashMap::with_capacity(symbols.len());
        for sym in symbols {
            match self.get_symbol_price(sym).await {
                Ok(price) => {
                    prices.insert(sym.clone(), price);
                }
                Err(e @ EngineError::NoPriceAtTime { .. }) => warn!(symbol = %sym, "{}", e),
                Err(e) if e.is_invalid_symbol() => {
                    warn!(symbol = %sym, "Exchange does not know symbol, skipping it")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(prices)
    }

    async fn get_symbol_price_at(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal> {
        if let Some(price) = self.cached_price_at(symbol, at).await {
            return Ok(price);
        }
        self.load_window(symbol, at).await?;
        self.cached_price_at(symbol, at)
            .await
            .ok_or_else(|| EngineError::NoPriceAtTime {
                symbol: symbol.to_string(),
                at,
            })
    }

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        self.live.get_symbol_rules(symbol).await
    }

    async fn refresh_fees(&self) -> Result<()> {
        Ok(())
    }

    fn get_fee(&self, _symbol: &str) -> Result<Decimal> {
        Ok(DEFAULT_FEE)
    }

    async fn buy(&self, coin: &str, alt_coin: &str, _cancel: &CancellationToken) -> Result<OrderResult> {
        self.trade(coin, alt_coin, Side::Buy).await
    }

    async fn sell(
        &self,
        coin: &str,
        alt_coin: &str,
        _cancel: &CancellationToken,
    ) -> Result<OrderResult> {
        self.trade(coin, alt_coin, Side::Sell).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn candle(open_time: DateTime<Utc>, open: Decimal, close: Decimal) -> Kline {
        Kline {
            open_time,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            close_time: open_time + Duration::minutes(1) - Duration::milliseconds(1),
        }
    }

    #[test]
    fn test_price_comes_from_enclosing_candle() {
        let t0 = Utc.with_ymd_and_hms(2021, 5, 1, 10, 0, 0).unwrap();
        let series: CandleSeries = [
            candle(t0, dec!(1), dec!(3)),
            candle(t0 + Duration::minutes(1), dec!(3), dec!(5)),
        ]
        .into_iter()
        .map(|k| (k.open_time, k))
        .collect();

        assert_eq!(candle_price_at(&series, t0), Some(dec!(2)));
        assert_eq!(candle_price_at(&series, t0 + Duration::seconds(90)), Some(dec!(4)));
        assert_eq!(candle_price_at(&series, t0 - Duration::seconds(1)), None);
        // past the close of the last candle
        assert_eq!(candle_price_at(&series, t0 + Duration::minutes(2)), None);
    }
}
