//! Common test utilities and fixtures

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use coin_rotator::common::types::{step_size_format, symbol};
use coin_rotator::config::load_from_str;
use coin_rotator::{
    AppConfig, Clock, EngineError, Exchange, Order, OrderResult, OrderStatus, Result, SymbolRules,
};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

/// Start of every replayed scenario
pub static T0: Lazy<DateTime<Utc>> = Lazy::new(|| Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());

/// Minimal configuration rotating `coins` through USDT
pub fn config_for(coins: &[&str], extra: &str) -> AppConfig {
    let coins = coins
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
        [trading]
        bridge = "USDT"
        coins = [{}]

        [jump]
        when_gain = 1.5
        decrease_by = 0.5
        after_seconds = 3600
        min = 0.5

        {}
        "#,
        coins, extra
    );
    load_from_str(&toml).unwrap()
}

/// Exchange serving scripted prices and filling orders instantly
///
/// Prices are step functions: a price set at `t` holds until the next one. Orders fill at the
/// current price with `fee` deducted from the received asset.
pub struct FakeExchange {
    clock: Arc<dyn Clock>,
    bridge: String,
    fee: Decimal,
    prices: Mutex<HashMap<String, BTreeMap<DateTime<Utc>, Decimal>>>,
    balances: Mutex<HashMap<String, Decimal>>,
    next_order_id: AtomicI64,
}

impl FakeExchange {
    pub fn new(clock: Arc<dyn Clock>, fee: Decimal) -> Self {
        Self {
            clock,
            bridge: "USDT".to_string(),
            fee,
            prices: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            next_order_id: AtomicI64::new(1),
        }
    }

    pub fn set_price(&self, symbol: &str, from: DateTime<Utc>, price: Decimal) {
        self.prices
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .insert(from, price);
    }

    pub fn set_balance(&self, coin: &str, amount: Decimal) {
        self.balances.lock().unwrap().insert(coin.to_string(), amount);
    }

    pub fn balance(&self, coin: &str) -> Decimal {
        self.balances
            .lock()
            .unwrap()
            .get(coin)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn price_at(&self, sym: &str, at: DateTime<Utc>) -> Result<Decimal> {
        self.prices
            .lock()
            .unwrap()
            .get(sym)
            .and_then(|series| series.range(..=at).next_back().map(|(_, p)| *p))
            .ok_or_else(|| EngineError::NoPriceAtTime {
                symbol: sym.to_string(),
                at,
            })
    }

    fn fill(&self, coin: &str, buy: bool) -> Result<OrderResult> {
        let sym = symbol(coin, &self.bridge);
        let price = self.price_at(&sym, self.clock.now())?;
        let kept = Decimal::ONE - self.fee;
        let mut balances = self.balances.lock().unwrap();
        let coin_balance = balances.get(coin).copied().unwrap_or(Decimal::ZERO);
        let bridge_balance = balances.get(&self.bridge).copied().unwrap_or(Decimal::ZERO);

        let quantity = if buy {
            step_size_format(bridge_balance / price, dec!(0.0001))
        } else {
            coin_balance
        };
        if quantity.is_zero() {
            return Err(EngineError::InsufficientData(format!("nothing to trade on {}", sym)));
        }
        if buy {
            balances.insert(coin.to_string(), coin_balance + quantity * kept);
            balances.insert(self.bridge.clone(), bridge_balance - quantity * price);
        } else {
            balances.insert(coin.to_string(), Decimal::ZERO);
            balances.insert(self.bridge.clone(), bridge_balance + quantity * price * kept);
        }

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
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, v)| !v.is_zero())
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    async fn get_symbol_price(&self, symbol: &str) -> Result<Decimal> {
        self.price_at(symbol, self.clock.now())
    }

    async fn get_symbol_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let now = self.clock.now();
        Ok(symbols
            .iter()
            .filter_map(|s| self.price_at(s, now).ok().map(|p| (s.clone(), p)))
            .collect())
    }

    async fn get_symbol_price_at(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal> {
        self.price_at(symbol, at)
    }

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        Ok(SymbolRules {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches(&self.bridge).to_string(),
            quote_asset: self.bridge.clone(),
            step_size: dec!(0.0001),
            quote_precision: 8,
        })
    }

    async fn refresh_fees(&self) -> Result<()> {
        Ok(())
    }

    fn get_fee(&self, _symbol: &str) -> Result<Decimal> {
        Ok(self.fee)
    }

    async fn buy(&self, coin: &str, _alt_coin: &str, _cancel: &CancellationToken) -> Result<OrderResult> {
        self.fill(coin, true)
    }

    async fn sell(&self, coin: &str, _alt_coin: &str, _cancel: &CancellationToken) -> Result<OrderResult> {
        self.fill(coin, false)
    }
}

/// Sample Binance REST payloads
pub mod api_responses {
    /// `/api/v3/exchangeInfo` with two symbols
    pub const EXCHANGE_INFO: &str = r#"{
        "symbols": [
            {
                "symbol": "NEARUSDT",
                "baseAsset": "NEAR",
                "quoteAsset": "USDT",
                "quotePrecision": 8,
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.001", "maxPrice": "10000", "tickSize": "0.001"},
                    {"filterType": "LOT_SIZE", "minQty": "0.1", "maxQty": "90000", "stepSize": "0.1"}
                ]
            },
            {
                "symbol": "ADAUSDT",
                "baseAsset": "ADA",
                "quoteAsset": "USDT",
                "quotePrecision": 8,
                "filters": [
                    {"filterType": "LOT_SIZE", "minQty": "1", "maxQty": "900000", "stepSize": "1"}
                ]
            }
        ]
    }"#;

    /// `/api/v3/account`
    pub const ACCOUNT: &str = r#"{
        "makerCommission": 10,
        "balances": [
            {"asset": "USDT", "free": "100.5", "locked": "0"},
            {"asset": "NEAR", "free": "0", "locked": "0"},
            {"asset": "ADA", "free": "250", "locked": "10"}
        ]
    }"#;

    /// `/sapi/v1/asset/tradeFee`
    pub const TRADE_FEES: &str = r#"[
        {"symbol": "NEARUSDT", "makerCommission": "0.001", "takerCommission": "0.001"},
        {"symbol": "ADAUSDT", "makerCommission": "0.00075", "takerCommission": "0.00075"}
    ]"#;

    /// Invalid symbol error body
    pub const INVALID_SYMBOL: &str = r#"{"code": -1121, "msg": "Invalid symbol."}"#;
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_rotator::SteppedClock;

    #[tokio::test]
    async fn test_fake_exchange_prices_are_step_functions() {
        let clock = Arc::new(SteppedClock::new(*T0, *T0 + chrono::Duration::hours(1), chrono::Duration::minutes(1)));
        let exchange = FakeExchange::new(clock.clone(), Decimal::ZERO);
        exchange.set_price("AUSDT", *T0, dec!(10));
        exchange.set_price("AUSDT", *T0 + chrono::Duration::minutes(2), dec!(12));

        assert_eq!(exchange.get_symbol_price("AUSDT").await.unwrap(), dec!(10));
        clock.advance();
        clock.advance();
        assert_eq!(exchange.get_symbol_price("AUSDT").await.unwrap(), dec!(12));
        assert!(exchange.get_symbol_price("BUSDT").await.is_err());
    }
}
