//! Pair ratios computed from the latest price batch

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::common::errors::Result;
use crate::common::types::{symbol, PairHistory, PairRatio};
use crate::storage::{PairFilter, Repository};

/// Computes and records `price(from) / price(to)` for every existing pair
pub struct PairRatioTracker {
    repository: Arc<dyn Repository>,
    bridge: String,
}

impl PairRatioTracker {
    pub fn new(repository: Arc<dyn Repository>, bridge: impl Into<String>) -> Self {
        Self {
            repository,
            bridge: bridge.into(),
        }
    }

    /// Ratios of the last price batch, candidates sorted by symbol
    ///
    /// One history row is written per existing pair; only pairs rotating into an enabled coin
    /// are returned. Every returned ratio carries the timestamp of the price batch.
    pub async fn calculate(&self) -> Result<Vec<PairRatio>> {
        let mut prices = self.repository.get_coins_last_price(&self.bridge).await?;
        let Some(now) = prices.first().map(|p| p.timestamp) else {
            return Ok(Vec::new());
        };
        prices.sort_by(|a, b| a.coin.cmp(&b.coin));

        let pairs = self.repository.get_pairs(&PairFilter::existing()).await?;
        let enabled: HashSet<String> = self
            .repository
            .get_enabled_coins()
            .await?
            .into_iter()
            .collect();

        let mut history = Vec::new();
        let mut candidates = Vec::new();
        for from in &prices {
            for to in &prices {
                let Some(pair) = pairs.get(&symbol(&from.coin, &to.coin)) else {
                    continue;
                };
                let Some(ratio) = from.price.checked_div(to.price) else {
                    warn!(pair = %pair.log_symbol(), "Zero price, skipping ratio");
                    continue;
                };

                history.push(PairHistory {
                    from_coin: pair.from_coin.clone(),
                    to_coin: pair.to_coin.clone(),
                    timestamp: now,
                    ratio,
                    averaged: false,
                });
                if enabled.contains(&pair.to_coin) {
                    candidates.push(PairRatio {
                        pair: pair.clone(),
                        ratio,
                        timestamp: now,
                    });
                }
            }
        }

        self.repository.upsert_pair_history(&history).await?;
        debug!(saved = history.len(), candidates = candidates.len(), "Saved pair ratios");
        Ok(candidates)
    }
}
