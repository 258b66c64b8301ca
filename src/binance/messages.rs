//! Binance spot REST payloads

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::errors::{EngineError, Result};
use crate::common::types::{CancelResult, Order, OrderStatus, SymbolRules};

/// Error body returned with non-2xx statuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// `/api/v3/ticker/price` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// `/api/v3/account` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    #[serde(default)]
    pub balances: Vec<AccountBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// `/api/v3/exchangeInfo` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeInfoResponse {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(alias = "quoteAssetPrecision")]
    pub quote_precision: u32,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

impl SymbolInfo {
    /// Lot-size step, `None` when the exchange sends no LOT_SIZE filter
    pub fn step_size(&self) -> Option<Decimal> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::LotSize { step_size, .. } => Some(*step_size),
            SymbolFilter::Other => None,
        })
    }

    pub fn into_rules(self) -> Result<SymbolRules> {
        let step_size = self.step_size().ok_or_else(|| {
            EngineError::InvalidResponse(format!("{} has no LOT_SIZE filter", self.symbol))
        })?;
        Ok(SymbolRules {
            symbol: self.symbol,
            base_asset: self.base_asset,
            quote_asset: self.quote_asset,
            step_size,
            quote_precision: self.quote_precision,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        min_qty: Decimal,
        max_qty: Decimal,
        step_size: Decimal,
    },
    #[serde(other)]
    Other,
}

/// `/sapi/v1/asset/tradeFee` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFee {
    pub symbol: String,
    pub maker_commission: Decimal,
    pub taker_commission: Decimal,
}

/// Answer to order creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderResponse {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub transact_time: Option<i64>,
}

/// `/api/v3/order` GET response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: OrderStatus,
    pub time: i64,
}

impl From<OrderResponse> for Order {
    fn from(r: OrderResponse) -> Self {
        Order {
            symbol: r.symbol,
            order_id: r.order_id,
            status: r.status,
            price: r.price,
            orig_quantity: r.orig_qty,
            executed_quantity: r.executed_qty,
            time: millis_to_datetime(r.time),
        }
    }
}

/// `/api/v3/order` DELETE response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub price: Decimal,
    pub executed_qty: Decimal,
    pub status: OrderStatus,
}

impl From<CancelOrderResponse> for CancelResult {
    fn from(r: CancelOrderResponse) -> Self {
        CancelResult {
            symbol: r.symbol,
            order_id: r.order_id,
            status: r.status,
            price: r.price,
            executed_quantity: r.executed_qty,
        }
    }
}

/// One candle of `/api/v3/klines`
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub close_time: DateTime<Utc>,
}

impl Kline {
    /// Point price used for replays: middle of open and close
    pub fn mid_price(&self) -> Decimal {
        (self.open + self.close) / Decimal::TWO
    }

    /// Parse the array form `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`
    pub fn from_row(row: &[serde_json::Value]) -> Result<Self> {
        if row.len() < 7 {
            return Err(EngineError::InvalidResponse(format!(
                "kline row has {} fields",
                row.len()
            )));
        }
        Ok(Self {
            open_time: millis_to_datetime(as_i64(&row[0])?),
            open: as_decimal(&row[1])?,
            high: as_decimal(&row[2])?,
            low: as_decimal(&row[3])?,
            close: as_decimal(&row[4])?,
            close_time: millis_to_datetime(as_i64(&row[6])?),
        })
    }
}

fn as_i64(value: &serde_json::Value) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| EngineError::InvalidResponse(format!("expected integer, got {}", value)))
}

fn as_decimal(value: &serde_json::Value) -> Result<Decimal> {
    let raw = value
        .as_str()
        .ok_or_else(|| EngineError::InvalidResponse(format!("expected string, got {}", value)))?;
    raw.parse()
        .map_err(|e| EngineError::InvalidResponse(format!("Invalid decimal {}: {}", raw, e)))
}

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exchange_info_lot_size() {
        let raw = r#"{
            "symbols": [{
                "symbol": "NEARUSDT",
                "status": "TRADING",
                "baseAsset": "NEAR",
                "quoteAsset": "USDT",
                "quotePrecision": 8,
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.001", "maxPrice": "10000", "tickSize": "0.001"},
                    {"filterType": "LOT_SIZE", "minQty": "0.1", "maxQty": "9000000", "stepSize": "0.10000000"}
                ]
            }]
        }"#;
        let info: ExchangeInfoResponse = serde_json::from_str(raw).unwrap();
        let rules = info.symbols.into_iter().next().unwrap().into_rules().unwrap();

        assert_eq!(rules.step_size, dec!(0.1));
        assert_eq!(rules.quote_precision, 8);
        assert_eq!(rules.base_asset, "NEAR");
    }

    #[test]
    fn test_order_response_conversion() {
        let raw = r#"{
            "symbol": "ADAUSDT", "orderId": 28, "orderListId": -1, "clientOrderId": "abc",
            "price": "0.35000000", "origQty": "100.00000000", "executedQty": "40.00000000",
            "cummulativeQuoteQty": "14.0", "status": "PARTIALLY_FILLED", "timeInForce": "GTC",
            "type": "LIMIT", "side": "SELL", "time": 1507725176595, "updateTime": 1507725176595
        }"#;
        let order: Order = serde_json::from_str::<OrderResponse>(raw).unwrap().into();

        assert_eq!(order.order_id, 28);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.executed_quantity, dec!(40));
        assert_eq!(order.time.timestamp_millis(), 1507725176595);
    }

    #[test]
    fn test_kline_mid_price() {
        let row: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1499040000000, "10.0", "12.0", "9.0", "11.0", "148976.1", 1499040059999, "2434.1", 308, "1756.8", "28.4", "0"]"#,
        )
        .unwrap();
        let kline = Kline::from_row(&row).unwrap();

        assert_eq!(kline.mid_price(), dec!(10.5));
        assert_eq!(kline.open_time.timestamp_millis(), 1499040000000);
    }
}
