//! Persistent store capability and its implementations
//!
//! All writes are upserts keyed by the entity's primary key, last writer wins:
//!
//! | entity          | key                              |
//! |-----------------|----------------------------------|
//! | Coin            | coin                             |
//! | Pair            | (from_coin, to_coin)             |
//! | PairHistory     | (from_coin, to_coin, timestamp)  |
//! | CoinPrice       | (coin, alt_coin, timestamp)      |
//! | CurrentCoin     | append only                      |
//! | Jump            | append only                      |
//! | Diff            | replaced wholesale               |
//! | BalanceHistory  | timestamp                        |

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::common::errors::Result;
use crate::common::types::{
    BalanceHistory, Coin, CoinPrice, CurrentCoin, Diff, Jump, Pair, PairHistory,
};

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

/// Pair query filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairFilter {
    /// Only pairs flagged as tradable
    pub existing_only: bool,
    /// Only pairs rotating into this coin
    pub to_coin: Option<String>,
}

impl PairFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn existing() -> Self {
        Self {
            existing_only: true,
            to_coin: None,
        }
    }

    pub fn to_coin(coin: impl Into<String>) -> Self {
        Self {
            existing_only: false,
            to_coin: Some(coin.into()),
        }
    }

    pub fn matches(&self, pair: &Pair) -> bool {
        if self.existing_only && !pair.exists {
            return false;
        }
        match &self.to_coin {
            Some(coin) => &pair.to_coin == coin,
            None => true,
        }
    }
}

/// Result of a retention compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Hourly average rows written
    pub inserted: u64,
    /// Raw rows removed
    pub deleted: u64,
}

/// Start of the UTC day containing `t`, the compaction boundary
pub fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
        .single()
        .unwrap_or(t)
}

/// Start of the UTC hour containing `t`, the compaction bucket
pub fn start_of_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let ms = t.timestamp_millis();
    let bucket = ms - ms.rem_euclid(3_600_000);
    Utc.timestamp_millis_opt(bucket).single().unwrap_or(t)
}

/// Store capability used by the engine
#[async_trait]
pub trait Repository: Send + Sync {
    // ------------------------------------------------------------------
    // Coins
    // ------------------------------------------------------------------

    async fn upsert_coins(&self, coins: &[Coin]) -> Result<()>;

    async fn get_all_coins(&self) -> Result<Vec<Coin>>;

    /// Enabled coin tickers, sorted
    async fn get_enabled_coins(&self) -> Result<Vec<String>>;

    async fn disable_coin(&self, coin: &str) -> Result<()>;

    // ------------------------------------------------------------------
    // Pairs
    // ------------------------------------------------------------------

    async fn upsert_pairs(&self, pairs: &[Pair]) -> Result<()>;

    /// Pairs keyed by `FROMTO` symbol
    async fn get_pairs(&self, filter: &PairFilter) -> Result<HashMap<String, Pair>>;

    // ------------------------------------------------------------------
    // Prices and ratio history
    // ------------------------------------------------------------------

    async fn upsert_coin_prices(&self, prices: &[CoinPrice]) -> Result<()>;

    /// Latest price batch quoted in `alt_coin`: the rows sharing the most recent timestamp
    async fn get_coins_last_price(&self, alt_coin: &str) -> Result<Vec<CoinPrice>>;

    async fn upsert_pair_history(&self, rows: &[PairHistory]) -> Result<()>;

    /// Latest ratio sample strictly before `before` for each pair of two enabled coins
    async fn get_last_pair_ratios_before(&self, before: DateTime<Utc>) -> Result<Vec<PairHistory>>;

    /// Average ratio of a pair over `[start, end]`, `None` without samples
    async fn get_avg_pair_ratio_between(
        &self,
        from_coin: &str,
        to_coin: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Decimal>>;

    // ------------------------------------------------------------------
    // Held asset and rotations
    // ------------------------------------------------------------------

    /// Most recent held-asset row
    async fn get_current_coin(&self) -> Result<Option<CurrentCoin>>;

    async fn set_current_coin(&self, coin: &str, at: DateTime<Utc>) -> Result<()>;

    async fn insert_jump(&self, jump: &Jump) -> Result<()>;

    /// Most recent jumps first, at most `limit`
    async fn get_jumps(&self, limit: usize) -> Result<Vec<Jump>>;

    /// Every jump, oldest first
    async fn get_all_jumps(&self) -> Result<Vec<Jump>>;

    async fn get_last_jump(&self) -> Result<Option<Jump>> {
        Ok(self.get_jumps(1).await?.into_iter().next())
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Drop every diff row and store `diffs`
    async fn replace_all_diffs(&self, diffs: &[Diff]) -> Result<()>;

    async fn get_diffs(&self) -> Result<Vec<Diff>>;

    async fn insert_balance_history(&self, row: &BalanceHistory) -> Result<()>;

    /// Most recent snapshots first, at most `limit`
    async fn get_balance_history(&self, limit: usize) -> Result<Vec<BalanceHistory>>;

    // ------------------------------------------------------------------
    // Symbol blacklist
    // ------------------------------------------------------------------

    async fn blacklist_symbol(&self, symbol: &str, at: DateTime<Utc>) -> Result<()>;

    async fn get_blacklisted_symbols(&self) -> Result<Vec<String>>;

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Collapse raw ratio samples older than `before` into hourly averages
    async fn compact_pair_history(&self, before: DateTime<Utc>) -> Result<CompactionStats>;

    /// Collapse raw price samples older than `before` into hourly averages
    async fn compact_coin_prices(&self, before: DateTime<Utc>) -> Result<CompactionStats>;

    /// First jump time, else first recorded price time
    async fn first_activity(&self) -> Result<Option<DateTime<Utc>>>;
}
