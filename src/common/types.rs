//! Unified types used across the engine, the exchange clients and the store

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Trading symbol of `coin` quoted in `alt_coin`, e.g. `NEARUSDT`
pub fn symbol(coin: &str, alt_coin: &str) -> String {
    format!("{}{}", coin, alt_coin)
}

/// Human readable symbol used in logs, e.g. `NEAR/USDT`
pub fn log_symbol(coin: &str, alt_coin: &str) -> String {
    format!("{}/{}", coin, alt_coin)
}

/// Floor `quantity` to a multiple of the exchange lot-size `step`.
///
/// Never rounds up, and a quantity that already sits on the step grid is returned unchanged.
/// A zero step leaves the quantity untouched.
pub fn step_size_format(quantity: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return quantity;
    }
    let step = step.normalize();
    let steps = (quantity / step).floor();
    (steps * step).round_dp_with_strategy(step.scale(), RoundingStrategy::ToZero)
}

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// A tradable asset known to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Ticker symbol
    pub coin: String,
    /// Whether the engine trades this coin
    pub enabled: bool,
    /// When the coin was last enabled
    pub enabled_since: Option<DateTime<Utc>>,
}

/// Ordered rotation candidate FromCoin -> ToCoin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub from_coin: String,
    pub to_coin: String,
    /// Whether both legs of the pair are tradable against the bridge
    pub exists: bool,
    /// Last rotation into this pair
    pub last_jump: Option<DateTime<Utc>>,
    /// from price / to price at the last rotation, zero if never set
    pub last_jump_ratio: Decimal,
    /// Timestamp the ratio is based on
    pub last_jump_ratio_based_on: Option<DateTime<Utc>>,
}

impl Pair {
    /// New pair that was never rotated into
    pub fn new(from_coin: impl Into<String>, to_coin: impl Into<String>) -> Self {
        Self {
            from_coin: from_coin.into(),
            to_coin: to_coin.into(),
            exists: true,
            last_jump: None,
            last_jump_ratio: Decimal::ZERO,
            last_jump_ratio_based_on: None,
        }
    }

    /// Key used in pair maps (`FROMTO`)
    pub fn symbol(&self) -> String {
        symbol(&self.from_coin, &self.to_coin)
    }

    pub fn log_symbol(&self) -> String {
        log_symbol(&self.from_coin, &self.to_coin)
    }
}

/// One ratio sample of a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairHistory {
    pub from_coin: String,
    pub to_coin: String,
    pub timestamp: DateTime<Utc>,
    pub ratio: Decimal,
    /// Row is an hourly average produced by compaction
    #[serde(default)]
    pub averaged: bool,
}

/// Price of a coin quoted in another coin at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinPrice {
    pub coin: String,
    pub alt_coin: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub averaged: bool,
}

impl CoinPrice {
    pub fn symbol(&self) -> String {
        symbol(&self.coin, &self.alt_coin)
    }
}

/// Entry of the held-asset log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentCoin {
    pub coin: String,
    pub timestamp: DateTime<Utc>,
}

/// An executed rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jump {
    pub from_coin: String,
    pub to_coin: String,
    pub timestamp: DateTime<Utc>,
    pub from_price: Decimal,
    pub from_quantity: Decimal,
    pub to_price: Decimal,
    pub to_quantity: Decimal,
}

/// Profitability snapshot of a candidate pair for the last evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub from_coin: String,
    pub to_coin: String,
    pub timestamp: DateTime<Utc>,
    /// fee multiplier * current ratio / comparison ratio
    pub diff: Decimal,
    /// 1 + needed gain at evaluation time
    pub needed_diff: Decimal,
}

/// Portfolio value snapshot, one value per reference currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceHistory {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, Decimal>,
}

/// A pair with its freshly computed ratio
#[derive(Debug, Clone, PartialEq)]
pub struct PairRatio {
    pub pair: Pair,
    pub ratio: Decimal,
    /// Timestamp of the price batch the ratio comes from
    pub timestamp: DateTime<Utc>,
}

/// Exchange trading rules for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRules {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Lot-size step, quantities must be a multiple of it
    pub step_size: Decimal,
    /// Number of decimals accepted for the price
    pub quote_precision: u32,
}

/// Order lifecycle status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Canceled,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Filled, Canceled, Rejected or Expired
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub order_id: i64,
    pub status: OrderStatus,
    pub price: Decimal,
    pub orig_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub time: DateTime<Utc>,
}

/// Answer of the exchange to a cancel request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResult {
    pub symbol: String,
    pub order_id: i64,
    pub status: OrderStatus,
    pub price: Decimal,
    pub executed_quantity: Decimal,
}

/// Outcome of one order leg: last polled state plus the cancel answer if we had to cancel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order: Option<Order>,
    pub cancel: Option<CancelResult>,
}

impl OrderResult {
    pub fn filled(order: Order) -> Self {
        Self {
            order: Some(order),
            cancel: None,
        }
    }

    pub fn is_partially_executed(&self) -> bool {
        self.order
            .as_ref()
            .map(|o| o.status == OrderStatus::PartiallyFilled)
            .unwrap_or(false)
            || self
                .cancel
                .as_ref()
                .map(|c| c.status == OrderStatus::PartiallyFilled)
                .unwrap_or(false)
    }

    pub fn price(&self) -> Decimal {
        if let Some(order) = &self.order {
            return order.price;
        }
        if let Some(cancel) = &self.cancel {
            return cancel.price;
        }
        Decimal::ZERO
    }

    /// Executed quantity, the cancel answer wins because it is the most recent view
    pub fn quantity(&self) -> Decimal {
        if let Some(cancel) = &self.cancel {
            return cancel.executed_quantity;
        }
        if let Some(order) = &self.order {
            return order.executed_quantity;
        }
        Decimal::ZERO
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.order.as_ref().map(|o| o.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_step_size_format_floors() {
        assert_eq!(
            step_size_format(dec!(18584.63172), dec!(0.01000000)),
            dec!(18584.63)
        );
        assert_eq!(step_size_format(dec!(0.999), dec!(0.1)), dec!(0.9));
        assert_eq!(step_size_format(dec!(12.7), dec!(1.00000000)), dec!(12));
    }

    #[test]
    fn test_step_size_format_is_idempotent() {
        let once = step_size_format(dec!(42.123456), dec!(0.001));
        assert_eq!(once, dec!(42.123));
        assert_eq!(step_size_format(once, dec!(0.001)), once);
    }

    #[test]
    fn test_step_size_format_zero_step() {
        assert_eq!(step_size_format(dec!(3.14159), Decimal::ZERO), dec!(3.14159));
    }

    #[test]
    fn test_pair_symbols() {
        let pair = Pair::new("NEAR", "ADA");
        assert_eq!(pair.symbol(), "NEARADA");
        assert_eq!(pair.log_symbol(), "NEAR/ADA");
        assert!(pair.last_jump_ratio.is_zero());
    }

    #[test]
    fn test_order_status_parsing() {
        let status: OrderStatus = serde_json::from_str("\"PARTIALLY_FILLED\"").unwrap();
        assert_eq!(status, OrderStatus::PartiallyFilled);
        let status: OrderStatus = serde_json::from_str("\"EXPIRED_IN_MATCH\"").unwrap();
        assert_eq!(status, OrderStatus::Unknown);
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::PendingCancel.is_terminal());
    }

    #[test]
    fn test_order_result_prefers_cancel_quantity() {
        let now = Utc::now();
        let result = OrderResult {
            order: Some(Order {
                symbol: "ADAUSDT".to_string(),
                order_id: 1,
                status: OrderStatus::New,
                price: dec!(0.5),
                orig_quantity: dec!(100),
                executed_quantity: dec!(0),
                time: now,
            }),
            cancel: Some(CancelResult {
                symbol: "ADAUSDT".to_string(),
                order_id: 1,
                status: OrderStatus::PartiallyFilled,
                price: dec!(0.5),
                executed_quantity: dec!(30),
            }),
        };
        assert_eq!(result.quantity(), dec!(30));
        assert_eq!(result.price(), dec!(0.5));
        assert!(result.is_partially_executed());
        assert_eq!(result.time(), Some(now));
    }
}
