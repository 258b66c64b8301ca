//! Per-symbol trading fee table and round-trip fee math

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::common::errors::{EngineError, Result};

/// Fee rate used when the exchange table is unavailable, and in backtests
pub const DEFAULT_FEE: Decimal = dec!(0.001);

/// Round-trip multiplier of two default fees: (1 - 0.001)^2
pub const DEFAULT_FEE_MULTIPLIER: Decimal = dec!(0.998001);

/// Share of value kept after a sell with fee `sell_fee` followed by a buy with fee `buy_fee`
///
/// `1 - (s + b - s*b)`, the two deductions compound.
pub fn round_trip_multiplier(sell_fee: Decimal, buy_fee: Decimal) -> Decimal {
    Decimal::ONE - (sell_fee + buy_fee - sell_fee * buy_fee)
}

/// Symbol -> fee rate, shared between the fee refresher and readers
#[derive(Debug, Default)]
pub struct FeeCache {
    fees: RwLock<HashMap<String, Decimal>>,
}

impl FeeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fee of `symbol`, `FeeUnknown` before the first refresh that listed it
    pub fn get(&self, symbol: &str) -> Result<Decimal> {
        self.fees
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::FeeUnknown(symbol.to_string()))
    }

    /// Merge a freshly fetched table, existing symbols are overwritten
    pub fn update(&self, fees: impl IntoIterator<Item = (String, Decimal)>) -> usize {
        let mut table = self.fees.write().unwrap_or_else(|e| e.into_inner());
        let mut count = 0;
        for (symbol, fee) in fees {
            table.insert(symbol, fee);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.fees.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
