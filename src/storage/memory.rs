//! In-memory store used by backtests without a database and by tests

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{start_of_hour, CompactionStats, PairFilter, Repository};
use crate::common::errors::Result;
use crate::common::types::{
    BalanceHistory, Coin, CoinPrice, CurrentCoin, Diff, Jump, Pair, PairHistory,
};

type SeriesKey = (String, String, DateTime<Utc>);

#[derive(Debug, Default)]
struct State {
    coins: BTreeMap<String, Coin>,
    pairs: BTreeMap<(String, String), Pair>,
    pair_history: BTreeMap<SeriesKey, PairHistory>,
    coin_prices: BTreeMap<SeriesKey, CoinPrice>,
    current_coins: Vec<CurrentCoin>,
    jumps: Vec<Jump>,
    diffs: Vec<Diff>,
    balances: BTreeMap<DateTime<Utc>, BalanceHistory>,
    blacklist: BTreeMap<String, DateTime<Utc>>,
}

impl State {
    fn is_enabled(&self, coin: &str) -> bool {
        self.coins.get(coin).map(|c| c.enabled).unwrap_or(false)
    }
}

/// Store backed by ordered maps behind a `RwLock`
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored ratio samples
    pub async fn pair_history_len(&self) -> usize {
        self.state.read().await.pair_history.len()
    }

    /// Number of stored price samples
    pub async fn coin_prices_len(&self) -> usize {
        self.state.read().await.coin_prices.len()
    }
}

/// Average raw samples older than `before` per (series, hour) and drop the raw rows
fn compact<T, K, V>(
    rows: &mut BTreeMap<SeriesKey, T>,
    before: DateTime<Utc>,
    value: K,
    rebuild: V,
) -> CompactionStats
where
    K: Fn(&T) -> (Decimal, bool),
    V: Fn(&SeriesKey, Decimal) -> T,
{
    let mut buckets: BTreeMap<SeriesKey, (Decimal, u32)> = BTreeMap::new();
    let mut raw_keys = Vec::new();
    for (key, row) in rows.iter() {
        let (v, averaged) = value(row);
        if averaged || key.2 >= before {
            continue;
        }
        raw_keys.push(key.clone());
        let bucket = buckets
            .entry((key.0.clone(), key.1.clone(), start_of_hour(key.2)))
            .or_insert((Decimal::ZERO, 0));
        bucket.0 += v;
        bucket.1 += 1;
    }

    let deleted = raw_keys.len() as u64;
    for key in raw_keys {
        rows.remove(&key);
    }
    let inserted = buckets.len() as u64;
    for (key, (sum, count)) in buckets {
        let avg = sum / Decimal::from(count);
        let row = rebuild(&key, avg);
        rows.insert(key, row);
    }
    CompactionStats { inserted, deleted }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn upsert_coins(&self, coins: &[Coin]) -> Result<()> {
        let mut state = self.state.write().await;
        for coin in coins {
            state.coins.insert(coin.coin.clone(), coin.clone());
        }
        Ok(())
    }

    async fn get_all_coins(&self) -> Result<Vec<Coin>> {
        Ok(self.state.read().await.coins.values().cloned().collect())
    }

    async fn get_enabled_coins(&self) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .await
            .coins
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.coin.clone())
            .collect())
    }

    async fn disable_coin(&self, coin: &str) -> Result<()> {
        if let Some(c) = self.state.write().await.coins.get_mut(coin) {
            c.enabled = false;
        }
        Ok(())
    }

    async fn upsert_pairs(&self, pairs: &[Pair]) -> Result<()> {
        let mut state = self.state.write().await;
        for pair in pairs {
            state
                .pairs
                .insert((pair.from_coin.clone(), pair.to_coin.clone()), pair.clone());
        }
        Ok(())
    }

    async fn get_pairs(&self, filter: &PairFilter) -> Result<HashMap<String, Pair>> {
        Ok(self
            .state
            .read()
            .await
            .pairs
            .values()
            .filter(|p| filter.matches(p))
            .map(|p| (p.symbol(), p.clone()))
            .collect())
    }

    async fn upsert_coin_prices(&self, prices: &[CoinPrice]) -> Result<()> {
        let mut state = self.state.write().await;
        for price in prices {
            state.coin_prices.insert(
                (price.coin.clone(), price.alt_coin.clone(), price.timestamp),
                price.clone(),
            );
        }
        Ok(())
    }

    async fn get_coins_last_price(&self, alt_coin: &str) -> Result<Vec<CoinPrice>> {
        let state = self.state.read().await;
        let quoted: Vec<&CoinPrice> = state
            .coin_prices
            .values()
            .filter(|p| p.alt_coin == alt_coin)
            .collect();
        let Some(last) = quoted.iter().map(|p| p.timestamp).max() else {
            return Ok(Vec::new());
        };
        Ok(quoted
            .into_iter()
            .filter(|p| p.timestamp == last)
            .cloned()
            .collect())
    }

    async fn upsert_pair_history(&self, rows: &[PairHistory]) -> Result<()> {
        let mut state = self.state.write().await;
        for row in rows {
            state.pair_history.insert(
                (row.from_coin.clone(), row.to_coin.clone(), row.timestamp),
                row.clone(),
            );
        }
        Ok(())
    }

    async fn get_last_pair_ratios_before(&self, before: DateTime<Utc>) -> Result<Vec<PairHistory>> {
        let state = self.state.read().await;
        let mut latest: BTreeMap<(String, String), &PairHistory> = BTreeMap::new();
        for ((from, to, ts), row) in state.pair_history.iter() {
            if *ts >= before || !state.is_enabled(from) || !state.is_enabled(to) {
                continue;
            }
            // keys are ordered by timestamp within a pair, the last one seen wins
            latest.insert((from.clone(), to.clone()), row);
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn get_avg_pair_ratio_between(
        &self,
        from_coin: &str,
        to_coin: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Decimal>> {
        let state = self.state.read().await;
        let lower = (from_coin.to_string(), to_coin.to_string(), start);
        let upper = (from_coin.to_string(), to_coin.to_string(), end);
        let (sum, count) = state
            .pair_history
            .range(lower..=upper)
            .fold((Decimal::ZERO, 0u32), |(sum, count), (_, row)| {
                (sum + row.ratio, count + 1)
            });
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(sum / Decimal::from(count)))
    }

    async fn get_current_coin(&self) -> Result<Option<CurrentCoin>> {
        Ok(self
            .state
            .read()
            .await
            .current_coins
            .iter()
            .max_by_key(|c| c.timestamp)
            .cloned())
    }

    async fn set_current_coin(&self, coin: &str, at: DateTime<Utc>) -> Result<()> {
        self.state.write().await.current_coins.push(CurrentCoin {
            coin: coin.to_string(),
            timestamp: at,
        });
        Ok(())
    }

    async fn insert_jump(&self, jump: &Jump) -> Result<()> {
        self.state.write().await.jumps.push(jump.clone());
        Ok(())
    }

    async fn get_jumps(&self, limit: usize) -> Result<Vec<Jump>> {
        let state = self.state.read().await;
        let mut jumps = state.jumps.clone();
        jumps.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        jumps.truncate(limit);
        Ok(jumps)
    }

    async fn get_all_jumps(&self) -> Result<Vec<Jump>> {
        let mut jumps = self.state.read().await.jumps.clone();
        jumps.sort_by_key(|j| j.timestamp);
        Ok(jumps)
    }

    async fn replace_all_diffs(&self, diffs: &[Diff]) -> Result<()> {
        self.state.write().await.diffs = diffs.to_vec();
        Ok(())
    }

    async fn get_diffs(&self) -> Result<Vec<Diff>> {
        Ok(self.state.read().await.diffs.clone())
    }

    async fn insert_balance_history(&self, row: &BalanceHistory) -> Result<()> {
        self.state
            .write()
            .await
            .balances
            .insert(row.timestamp, row.clone());
        Ok(())
    }

    async fn get_balance_history(&self, limit: usize) -> Result<Vec<BalanceHistory>> {
        Ok(self
            .state
            .read()
            .await
            .balances
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn blacklist_symbol(&self, symbol: &str, at: DateTime<Utc>) -> Result<()> {
        self.state
            .write()
            .await
            .blacklist
            .insert(symbol.to_string(), at);
        Ok(())
    }

    async fn get_blacklisted_symbols(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.blacklist.keys().cloned().collect())
    }

    async fn compact_pair_history(&self, before: DateTime<Utc>) -> Result<CompactionStats> {
        let mut state = self.state.write().await;
        Ok(compact(
            &mut state.pair_history,
            before,
            |row| (row.ratio, row.averaged),
            |(from, to, ts), ratio| PairHistory {
                from_coin: from.clone(),
                to_coin: to.clone(),
                timestamp: *ts,
                ratio,
                averaged: true,
            },
        ))
    }

    async fn compact_coin_prices(&self, before: DateTime<Utc>) -> Result<CompactionStats> {
        let mut state = self.state.write().await;
        Ok(compact(
            &mut state.coin_prices,
            before,
            |row| (row.price, row.averaged),
            |(coin, alt, ts), price| CoinPrice {
                coin: coin.clone(),
                alt_coin: alt.clone(),
                price,
                timestamp: *ts,
                averaged: true,
            },
        ))
    }

    async fn first_activity(&self) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        if let Some(first_jump) = state.jumps.iter().map(|j| j.timestamp).min() {
            return Ok(Some(first_jump));
        }
        Ok(state.coin_prices.keys().map(|k| k.2).min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 10, 12, 0, 0).unwrap()
    }

    fn coin(name: &str, enabled: bool) -> Coin {
        Coin {
            coin: name.to_string(),
            enabled,
            enabled_since: Some(t0()),
        }
    }

    fn ratio(from: &str, to: &str, ts: DateTime<Utc>, ratio: Decimal) -> PairHistory {
        PairHistory {
            from_coin: from.to_string(),
            to_coin: to.to_string(),
            timestamp: ts,
            ratio,
            averaged: false,
        }
    }

    #[tokio::test]
    async fn test_upsert_same_key_keeps_latest_payload() {
        let repo = MemoryRepository::new();
        let mut pair = Pair::new("NEAR", "ADA");
        repo.upsert_pairs(&[pair.clone()]).await.unwrap();

        pair.last_jump_ratio = dec!(12.5);
        repo.upsert_pairs(&[pair.clone()]).await.unwrap();

        let pairs = repo.get_pairs(&PairFilter::all()).await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs["NEARADA"].last_jump_ratio, dec!(12.5));

        let row = ratio("NEAR", "ADA", t0(), dec!(1));
        repo.upsert_pair_history(&[row.clone()]).await.unwrap();
        repo.upsert_pair_history(&[ratio("NEAR", "ADA", t0(), dec!(2))])
            .await
            .unwrap();
        assert_eq!(repo.pair_history_len().await, 1);
    }

    #[tokio::test]
    async fn test_last_price_batch() {
        let repo = MemoryRepository::new();
        let price = |c: &str, ts, p| CoinPrice {
            coin: c.to_string(),
            alt_coin: "USDT".to_string(),
            price: p,
            timestamp: ts,
            averaged: false,
        };
        let t1 = t0() + Duration::minutes(1);
        repo.upsert_coin_prices(&[
            price("NEAR", t0(), dec!(5)),
            price("ADA", t0(), dec!(0.4)),
            price("NEAR", t1, dec!(5.1)),
            price("ADA", t1, dec!(0.41)),
        ])
        .await
        .unwrap();

        let mut last = repo.get_coins_last_price("USDT").await.unwrap();
        last.sort_by(|a, b| a.coin.cmp(&b.coin));
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].price, dec!(0.41));
        assert_eq!(last[1].timestamp, t1);
        assert!(repo.get_coins_last_price("BTC").await.unwrap().is_empty());
        assert_eq!(repo.first_activity().await.unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn test_ratio_queries() {
        let repo = MemoryRepository::new();
        repo.upsert_coins(&[coin("NEAR", true), coin("ADA", true), coin("ETH", false)])
            .await
            .unwrap();
        repo.upsert_pair_history(&[
            ratio("NEAR", "ADA", t0(), dec!(10)),
            ratio("NEAR", "ADA", t0() + Duration::minutes(1), dec!(12)),
            ratio("NEAR", "ADA", t0() + Duration::minutes(2), dec!(14)),
            ratio("NEAR", "ETH", t0(), dec!(1)),
        ])
        .await
        .unwrap();

        let last = repo
            .get_last_pair_ratios_before(t0() + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(last, vec![ratio("NEAR", "ADA", t0() + Duration::minutes(1), dec!(12))]);

        let avg = repo
            .get_avg_pair_ratio_between("NEAR", "ADA", t0(), t0() + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(avg, Some(dec!(11)));

        let none = repo
            .get_avg_pair_ratio_between("ADA", "NEAR", t0(), t0() + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_compaction_averages_hourly() {
        let repo = MemoryRepository::new();
        let day_start = Utc.with_ymd_and_hms(2023, 1, 11, 0, 0, 0).unwrap();
        repo.upsert_pair_history(&[
            ratio("NEAR", "ADA", t0(), dec!(10)),
            ratio("NEAR", "ADA", t0() + Duration::minutes(20), dec!(20)),
            ratio("NEAR", "ADA", t0() + Duration::minutes(70), dec!(30)),
            ratio("NEAR", "ADA", day_start + Duration::minutes(5), dec!(40)),
        ])
        .await
        .unwrap();

        let stats = repo.compact_pair_history(day_start).await.unwrap();
        assert_eq!(stats, CompactionStats { inserted: 2, deleted: 3 });
        assert_eq!(repo.pair_history_len().await, 3);

        let avg = repo
            .get_avg_pair_ratio_between("NEAR", "ADA", t0(), t0())
            .await
            .unwrap();
        assert_eq!(avg, Some(dec!(15)));

        let again = repo.compact_pair_history(day_start).await.unwrap();
        assert_eq!(again, CompactionStats::default());
    }

    #[tokio::test]
    async fn test_jump_and_current_coin_ordering() {
        let repo = MemoryRepository::new();
        assert!(repo.get_current_coin().await.unwrap().is_none());

        repo.set_current_coin("USDT", t0()).await.unwrap();
        repo.set_current_coin("ADA", t0() + Duration::seconds(1)).await.unwrap();
        assert_eq!(repo.get_current_coin().await.unwrap().unwrap().coin, "ADA");

        for (i, to) in ["ADA", "NEAR", "ETH"].iter().enumerate() {
            repo.insert_jump(&Jump {
                from_coin: "X".to_string(),
                to_coin: to.to_string(),
                timestamp: t0() + Duration::minutes(i as i64),
                from_price: dec!(1),
                from_quantity: dec!(1),
                to_price: dec!(1),
                to_quantity: dec!(1),
            })
            .await
            .unwrap();
        }
        let jumps = repo.get_jumps(2).await.unwrap();
        assert_eq!(jumps.len(), 2);
        assert_eq!(jumps[0].to_coin, "ETH");
        assert_eq!(repo.get_last_jump().await.unwrap().unwrap().to_coin, "ETH");
        assert_eq!(repo.first_activity().await.unwrap(), Some(t0()));
    }
}
