//! SQLite store built on sqlx
//!
//! Decimals are kept as TEXT so no precision is lost on the way through the database, and
//! timestamps as integer milliseconds since the epoch.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{start_of_hour, CompactionStats, PairFilter, Repository};
use crate::common::errors::{EngineError, Result};
use crate::common::types::{
    BalanceHistory, Coin, CoinPrice, CurrentCoin, Diff, Jump, Pair, PairHistory,
};
use crate::config::types::DatabaseConfig;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS coins (
        coin TEXT PRIMARY KEY,
        enabled INTEGER NOT NULL,
        enabled_since INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS pairs (
        from_coin TEXT NOT NULL,
        to_coin TEXT NOT NULL,
        pair_exists INTEGER NOT NULL,
        last_jump INTEGER,
        last_jump_ratio TEXT NOT NULL,
        last_jump_ratio_based_on INTEGER,
        PRIMARY KEY (from_coin, to_coin)
    )",
    "CREATE TABLE IF NOT EXISTS pair_history (
        from_coin TEXT NOT NULL,
        to_coin TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        ratio TEXT NOT NULL,
        averaged INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (from_coin, to_coin, timestamp)
    )",
    "CREATE TABLE IF NOT EXISTS coin_prices (
        coin TEXT NOT NULL,
        alt_coin TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        price TEXT NOT NULL,
        averaged INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (coin, alt_coin, timestamp)
    )",
    "CREATE TABLE IF NOT EXISTS current_coins (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        coin TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS jumps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_coin TEXT NOT NULL,
        to_coin TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        from_price TEXT NOT NULL,
        from_quantity TEXT NOT NULL,
        to_price TEXT NOT NULL,
        to_quantity TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS diffs (
        from_coin TEXT NOT NULL,
        to_coin TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        diff TEXT NOT NULL,
        needed_diff TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS balance_history (
        timestamp INTEGER PRIMARY KEY,
        balances TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS symbol_blacklist (
        symbol TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_jumps_timestamp ON jumps (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_current_coins_timestamp ON current_coins (timestamp)",
];

const TABLES: &[&str] = &[
    "coins",
    "pairs",
    "pair_history",
    "coin_prices",
    "current_coins",
    "jumps",
    "diffs",
    "balance_history",
    "symbol_blacklist",
];

/// Store backed by a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if needed) the database and make sure the schema exists
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;
        info!(url = %config.url, "Connected to database");
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    /// Delete every row of every table, leaving the schema in place
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in TABLES {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(tables = TABLES.len(), "Database wiped");
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(tables = SCHEMA.len(), "Schema ready");
        Ok(())
    }
}

fn ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn opt_ms(t: Option<DateTime<Utc>>) -> Option<i64> {
    t.map(ms)
}

fn from_ms(value: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| EngineError::Internal(format!("invalid stored timestamp {}", value)))
}

fn opt_from_ms(value: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    value.map(from_ms).transpose()
}

fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text)
        .map_err(|e| EngineError::Internal(format!("invalid stored decimal {}: {}", text, e)))
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    from_ms(row.try_get(column)?)
}

fn coin_from_row(row: &SqliteRow) -> Result<Coin> {
    Ok(Coin {
        coin: row.try_get("coin")?,
        enabled: row.try_get("enabled")?,
        enabled_since: opt_from_ms(row.try_get("enabled_since")?)?,
    })
}

fn pair_from_row(row: &SqliteRow) -> Result<Pair> {
    Ok(Pair {
        from_coin: row.try_get("from_coin")?,
        to_coin: row.try_get("to_coin")?,
        exists: row.try_get("pair_exists")?,
        last_jump: opt_from_ms(row.try_get("last_jump")?)?,
        last_jump_ratio: decimal(row, "last_jump_ratio")?,
        last_jump_ratio_based_on: opt_from_ms(row.try_get("last_jump_ratio_based_on")?)?,
    })
}

fn pair_history_from_row(row: &SqliteRow) -> Result<PairHistory> {
    Ok(PairHistory {
        from_coin: row.try_get("from_coin")?,
        to_coin: row.try_get("to_coin")?,
        timestamp: timestamp(row, "timestamp")?,
        ratio: decimal(row, "ratio")?,
        averaged: row.try_get("averaged")?,
    })
}

fn coin_price_from_row(row: &SqliteRow) -> Result<CoinPrice> {
    Ok(CoinPrice {
        coin: row.try_get("coin")?,
        alt_coin: row.try_get("alt_coin")?,
        timestamp: timestamp(row, "timestamp")?,
        price: decimal(row, "price")?,
        averaged: row.try_get("averaged")?,
    })
}

fn jump_from_row(row: &SqliteRow) -> Result<Jump> {
    Ok(Jump {
        from_coin: row.try_get("from_coin")?,
        to_coin: row.try_get("to_coin")?,
        timestamp: timestamp(row, "timestamp")?,
        from_price: decimal(row, "from_price")?,
        from_quantity: decimal(row, "from_quantity")?,
        to_price: decimal(row, "to_price")?,
        to_quantity: decimal(row, "to_quantity")?,
    })
}

/// Sum and count per (series, hour) of the raw rows in `rows`
fn hourly_buckets(
    rows: impl IntoIterator<Item = (String, String, DateTime<Utc>, Decimal)>,
) -> BTreeMap<(String, String, DateTime<Utc>), (Decimal, u32)> {
    let mut buckets = BTreeMap::new();
    for (a, b, ts, value) in rows {
        let bucket = buckets
            .entry((a, b, start_of_hour(ts)))
            .or_insert((Decimal::ZERO, 0u32));
        bucket.0 += value;
        bucket.1 += 1;
    }
    buckets
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn upsert_coins(&self, coins: &[Coin]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for coin in coins {
            sqlx::query(
                "INSERT INTO coins (coin, enabled, enabled_since) VALUES (?, ?, ?)
                 ON CONFLICT (coin) DO UPDATE SET
                    enabled = excluded.enabled,
                    enabled_since = excluded.enabled_since",
            )
            .bind(&coin.coin)
            .bind(coin.enabled)
            .bind(opt_ms(coin.enabled_since))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_all_coins(&self) -> Result<Vec<Coin>> {
        let rows = sqlx::query("SELECT coin, enabled, enabled_since FROM coins ORDER BY coin")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(coin_from_row).collect()
    }

    async fn get_enabled_coins(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT coin FROM coins WHERE enabled = 1 ORDER BY coin")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("coin").map_err(EngineError::from))
            .collect()
    }

    async fn disable_coin(&self, coin: &str) -> Result<()> {
        sqlx::query("UPDATE coins SET enabled = 0 WHERE coin = ?")
            .bind(coin)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_pairs(&self, pairs: &[Pair]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for pair in pairs {
            sqlx::query(
                "INSERT INTO pairs (from_coin, to_coin, pair_exists, last_jump, last_jump_ratio, last_jump_ratio_based_on)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (from_coin, to_coin) DO UPDATE SET
                    pair_exists = excluded.pair_exists,
                    last_jump = excluded.last_jump,
                    last_jump_ratio = excluded.last_jump_ratio,
                    last_jump_ratio_based_on = excluded.last_jump_ratio_based_on",
            )
            .bind(&pair.from_coin)
            .bind(&pair.to_coin)
            .bind(pair.exists)
            .bind(opt_ms(pair.last_jump))
            .bind(pair.last_jump_ratio.to_string())
            .bind(opt_ms(pair.last_jump_ratio_based_on))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_pairs(&self, filter: &PairFilter) -> Result<HashMap<String, Pair>> {
        let rows = sqlx::query(
            "SELECT from_coin, to_coin, pair_exists, last_jump, last_jump_ratio, last_jump_ratio_based_on
             FROM pairs
             WHERE (? = 0 OR pair_exists = 1) AND (? IS NULL OR to_coin = ?)",
        )
        .bind(filter.existing_only)
        .bind(filter.to_coin.as_deref())
        .bind(filter.to_coin.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut pairs = HashMap::with_capacity(rows.len());
        for row in &rows {
            let pair = pair_from_row(row)?;
            pairs.insert(pair.symbol(), pair);
        }
        Ok(pairs)
    }

    async fn upsert_coin_prices(&self, prices: &[CoinPrice]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for price in prices {
            sqlx::query(
                "INSERT INTO coin_prices (coin, alt_coin, timestamp, price, averaged) VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (coin, alt_coin, timestamp) DO UPDATE SET
                    price = excluded.price,
                    averaged = excluded.averaged",
            )
            .bind(&price.coin)
            .bind(&price.alt_coin)
            .bind(ms(price.timestamp))
            .bind(price.price.to_string())
            .bind(price.averaged)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_coins_last_price(&self, alt_coin: &str) -> Result<Vec<CoinPrice>> {
        let rows = sqlx::query(
            "SELECT coin, alt_coin, timestamp, price, averaged FROM coin_prices
             WHERE alt_coin = ?
               AND timestamp = (SELECT MAX(timestamp) FROM coin_prices WHERE alt_coin = ?)
             ORDER BY coin",
        )
        .bind(alt_coin)
        .bind(alt_coin)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(coin_price_from_row).collect()
    }

    async fn upsert_pair_history(&self, rows: &[PairHistory]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO pair_history (from_coin, to_coin, timestamp, ratio, averaged) VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (from_coin, to_coin, timestamp) DO UPDATE SET
                    ratio = excluded.ratio,
                    averaged = excluded.averaged",
            )
            .bind(&row.from_coin)
            .bind(&row.to_coin)
            .bind(ms(row.timestamp))
            .bind(row.ratio.to_string())
            .bind(row.averaged)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_last_pair_ratios_before(&self, before: DateTime<Utc>) -> Result<Vec<PairHistory>> {
        let rows = sqlx::query(
            "SELECT ph.from_coin, ph.to_coin, ph.timestamp, ph.ratio, ph.averaged
             FROM pair_history ph
             JOIN (
                SELECT from_coin, to_coin, MAX(timestamp) AS last
                FROM pair_history
                WHERE timestamp < ?
                GROUP BY from_coin, to_coin
             ) latest ON latest.from_coin = ph.from_coin
                     AND latest.to_coin = ph.to_coin
                     AND latest.last = ph.timestamp
             JOIN coins cf ON cf.coin = ph.from_coin AND cf.enabled = 1
             JOIN coins ct ON ct.coin = ph.to_coin AND ct.enabled = 1
             ORDER BY ph.from_coin, ph.to_coin",
        )
        .bind(ms(before))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(pair_history_from_row).collect()
    }

    async fn get_avg_pair_ratio_between(
        &self,
        from_coin: &str,
        to_coin: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Decimal>> {
        // averaged in Rust, SQL AVG would go through floating point
        let rows = sqlx::query(
            "SELECT ratio FROM pair_history
             WHERE from_coin = ? AND to_coin = ? AND timestamp BETWEEN ? AND ?",
        )
        .bind(from_coin)
        .bind(to_coin)
        .bind(ms(start))
        .bind(ms(end))
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        let mut sum = Decimal::ZERO;
        for row in &rows {
            sum += decimal(row, "ratio")?;
        }
        Ok(Some(sum / Decimal::from(rows.len())))
    }

    async fn get_current_coin(&self) -> Result<Option<CurrentCoin>> {
        let row = sqlx::query(
            "SELECT coin, timestamp FROM current_coins ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(CurrentCoin {
                coin: row.try_get("coin")?,
                timestamp: timestamp(&row, "timestamp")?,
            })
        })
        .transpose()
    }

    async fn set_current_coin(&self, coin: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO current_coins (coin, timestamp) VALUES (?, ?)")
            .bind(coin)
            .bind(ms(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_jump(&self, jump: &Jump) -> Result<()> {
        sqlx::query(
            "INSERT INTO jumps (from_coin, to_coin, timestamp, from_price, from_quantity, to_price, to_quantity)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&jump.from_coin)
        .bind(&jump.to_coin)
        .bind(ms(jump.timestamp))
        .bind(jump.from_price.to_string())
        .bind(jump.from_quantity.to_string())
        .bind(jump.to_price.to_string())
        .bind(jump.to_quantity.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_jumps(&self, limit: usize) -> Result<Vec<Jump>> {
        let rows = sqlx::query(
            "SELECT from_coin, to_coin, timestamp, from_price, from_quantity, to_price, to_quantity
             FROM jumps ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(jump_from_row).collect()
    }

    async fn get_all_jumps(&self) -> Result<Vec<Jump>> {
        let rows = sqlx::query(
            "SELECT from_coin, to_coin, timestamp, from_price, from_quantity, to_price, to_quantity
             FROM jumps ORDER BY timestamp ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(jump_from_row).collect()
    }

    async fn replace_all_diffs(&self, diffs: &[Diff]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM diffs").execute(&mut *tx).await?;
        for diff in diffs {
            sqlx::query(
                "INSERT INTO diffs (from_coin, to_coin, timestamp, diff, needed_diff) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&diff.from_coin)
            .bind(&diff.to_coin)
            .bind(ms(diff.timestamp))
            .bind(diff.diff.to_string())
            .bind(diff.needed_diff.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_diffs(&self) -> Result<Vec<Diff>> {
        let rows = sqlx::query(
            "SELECT from_coin, to_coin, timestamp, diff, needed_diff FROM diffs ORDER BY from_coin, to_coin",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Diff {
                    from_coin: row.try_get("from_coin")?,
                    to_coin: row.try_get("to_coin")?,
                    timestamp: timestamp(row, "timestamp")?,
                    diff: decimal(row, "diff")?,
                    needed_diff: decimal(row, "needed_diff")?,
                })
            })
            .collect()
    }

    async fn insert_balance_history(&self, row: &BalanceHistory) -> Result<()> {
        sqlx::query(
            "INSERT INTO balance_history (timestamp, balances) VALUES (?, ?)
             ON CONFLICT (timestamp) DO UPDATE SET balances = excluded.balances",
        )
        .bind(ms(row.timestamp))
        .bind(serde_json::to_string(&row.values)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_balance_history(&self, limit: usize) -> Result<Vec<BalanceHistory>> {
        let rows = sqlx::query(
            "SELECT timestamp, balances FROM balance_history ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let balances: String = row.try_get("balances")?;
                Ok(BalanceHistory {
                    timestamp: timestamp(row, "timestamp")?,
                    values: serde_json::from_str(&balances)?,
                })
            })
            .collect()
    }

    async fn blacklist_symbol(&self, symbol: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO symbol_blacklist (symbol, timestamp) VALUES (?, ?)
             ON CONFLICT (symbol) DO UPDATE SET timestamp = excluded.timestamp",
        )
        .bind(symbol)
        .bind(ms(at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_blacklisted_symbols(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT symbol FROM symbol_blacklist ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("symbol").map_err(EngineError::from))
            .collect()
    }

    async fn compact_pair_history(&self, before: DateTime<Utc>) -> Result<CompactionStats> {
        let mut tx = self.pool.begin().await?;
        let raw = sqlx::query(
            "SELECT from_coin, to_coin, timestamp, ratio, averaged FROM pair_history
             WHERE averaged = 0 AND timestamp < ?",
        )
        .bind(ms(before))
        .fetch_all(&mut *tx)
        .await?;
        let rows = raw
            .iter()
            .map(pair_history_from_row)
            .collect::<Result<Vec<_>>>()?;
        let buckets = hourly_buckets(
            rows.into_iter()
                .map(|r| (r.from_coin, r.to_coin, r.timestamp, r.ratio)),
        );

        let deleted = sqlx::query("DELETE FROM pair_history WHERE averaged = 0 AND timestamp < ?")
            .bind(ms(before))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        for ((from, to, hour), (sum, count)) in &buckets {
            sqlx::query(
                "INSERT OR REPLACE INTO pair_history (from_coin, to_coin, timestamp, ratio, averaged)
                 VALUES (?, ?, ?, ?, 1)",
            )
            .bind(from)
            .bind(to)
            .bind(ms(*hour))
            .bind((*sum / Decimal::from(*count)).to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(CompactionStats {
            inserted: buckets.len() as u64,
            deleted,
        })
    }

    async fn compact_coin_prices(&self, before: DateTime<Utc>) -> Result<CompactionStats> {
        let mut tx = self.pool.begin().await?;
        let raw = sqlx::query(
            "SELECT coin, alt_coin, timestamp, price, averaged FROM coin_prices
             WHERE averaged = 0 AND timestamp < ?",
        )
        .bind(ms(before))
        .fetch_all(&mut *tx)
        .await?;
        let rows = raw
            .iter()
            .map(coin_price_from_row)
            .collect::<Result<Vec<_>>>()?;
        let buckets =
            hourly_buckets(rows.into_iter().map(|r| (r.coin, r.alt_coin, r.timestamp, r.price)));

        let deleted = sqlx::query("DELETE FROM coin_prices WHERE averaged = 0 AND timestamp < ?")
            .bind(ms(before))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        for ((coin, alt, hour), (sum, count)) in &buckets {
            sqlx::query(
                "INSERT OR REPLACE INTO coin_prices (coin, alt_coin, timestamp, price, averaged)
                 VALUES (?, ?, ?, ?, 1)",
            )
            .bind(coin)
            .bind(alt)
            .bind(ms(*hour))
            .bind((*sum / Decimal::from(*count)).to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(CompactionStats {
            inserted: buckets.len() as u64,
            deleted,
        })
    }

    async fn first_activity(&self) -> Result<Option<DateTime<Utc>>> {
        let first_jump: Option<i64> = sqlx::query_scalar("SELECT MIN(timestamp) FROM jumps")
            .fetch_one(&self.pool)
            .await?;
        if let Some(ts) = first_jump {
            return from_ms(ts).map(Some);
        }
        let first_price: Option<i64> = sqlx::query_scalar("SELECT MIN(timestamp) FROM coin_prices")
            .fetch_one(&self.pool)
            .await?;
        opt_from_ms(first_price)
    }
}
