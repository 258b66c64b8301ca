//! Startup synchronisation of coins and pairs with the configuration

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::blacklist::SymbolBlacklist;
use crate::common::errors::{EngineError, Result};
use crate::common::traits::Exchange;
use crate::common::types::{symbol, Coin, Pair};
use crate::storage::{PairFilter, Repository};

/// Enable the configured coins and disable stored coins that are no longer configured
pub async fn load_coins(repository: &dyn Repository, coins: &[String], now: DateTime<Utc>) -> Result<()> {
    let configured: HashSet<&str> = coins.iter().map(String::as_str).collect();
    let stored = repository.get_all_coins().await?;

    let mut rows: Vec<Coin> = Vec::with_capacity(configured.len() + stored.len());
    for coin in &stored {
        if !configured.contains(coin.coin.as_str()) && coin.enabled {
            rows.push(Coin {
                enabled: false,
                ..coin.clone()
            });
        }
    }
    for name in coins {
        let previous = stored.iter().find(|c| &c.coin == name);
        let enabled_since = match previous {
            Some(c) if c.enabled => c.enabled_since,
            _ => Some(now),
        };
        rows.push(Coin {
            coin: name.clone(),
            enabled: true,
            enabled_since,
        });
    }

    repository.upsert_coins(&rows).await?;
    info!(configured = coins.len(), updated = rows.len(), "Loaded coins");
    Ok(())
}

/// Create every missing pair of enabled coins and give each pair a starting ratio
///
/// Returns the number of pairs written.
pub async fn initialize_pairs(
    repository: &dyn Repository,
    exchange: &dyn Exchange,
    blacklist: &SymbolBlacklist,
    bridge: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut coins = repository.get_enabled_coins().await?;
    coins.sort();
    let stored = repository.get_pairs(&PairFilter::all()).await?;
    let blacklisted = blacklist.symbols().await?;
    let jumps = repository.get_all_jumps().await?;
    let first_activity = repository.first_activity().await?.unwrap_or(now);

    let mut disabled: HashSet<String> = HashSet::new();
    let mut updates: Vec<Pair> = Vec::new();
    let mut created = 0usize;

    for from in &coins {
        for to in &coins {
            if from == to || disabled.contains(from) || disabled.contains(to) {
                continue;
            }
            let mut pair = match stored.get(&symbol(from, to)) {
                Some(pair) if !pair.last_jump_ratio.is_zero() => continue,
                Some(pair) if !pair.exists => continue,
                Some(pair) => pair.clone(),
                None => {
                    created += 1;
                    let mut pair = Pair::new(from.as_str(), to.as_str());
                    pair.exists = !blacklisted.contains(&symbol(from, bridge))
                        && !blacklisted.contains(&symbol(to, bridge));
                    if !pair.exists {
                        updates.push(pair);
                        continue;
                    }
                    pair
                }
            };

            let last_jump_into = jumps.iter().rev().find(|j| &j.to_coin == to);
            let (from_price, to_price, based_on) = match last_jump_into {
                Some(jump) => {
                    let at = jump.timestamp;
                    let from_price = match exchange.get_symbol_price_at(&symbol(from, bridge), at).await {
                        Ok(price) => price,
                        Err(EngineError::NoPriceAtTime { .. }) => {
                            warn!(coin = %from, %at, "No historical price, disabling coin");
                            repository.disable_coin(from).await?;
                            disabled.insert(from.clone());
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    let to_price = exchange.get_symbol_price_at(&symbol(to, bridge), at).await?;
                    (from_price, to_price, at)
                }
                None => {
                    let from_price = exchange.get_symbol_price(&symbol(from, bridge)).await?;
                    let to_price = exchange.get_symbol_price(&symbol(to, bridge)).await?;
                    (from_price, to_price, first_activity)
                }
            };

            if to_price.is_zero() {
                debug!(pair = %pair.log_symbol(), "Target price is zero, leaving ratio unset");
            } else {
                pair.last_jump_ratio = from_price / to_price;
                pair.last_jump_ratio_based_on = Some(based_on);
            }
            updates.push(pair);
        }
    }

    // a pair computed before its coin got disabled stays valid, the finder skips it
    let ratio_count = updates
        .iter()
        .filter(|p| p.last_jump_ratio > Decimal::ZERO)
        .count();
    repository.upsert_pairs(&updates).await?;
    info!(
        created,
        initialized = ratio_count,
        disabled = disabled.len(),
        "Initialized pairs"
    );
    Ok(updates.len())
}
