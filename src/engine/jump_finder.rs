//! Decision cycle: is there a rotation worth paying the fees for?
//!
//! Runs once per "prices fetched" event. Two situations are handled:
//!
//! * nothing is held yet (or the bridge is held): pick the coin whose ratio improved the most
//!   over the last few minutes and buy it from the bridge
//! * a coin is held: compare every pair leaving it against its last jump ratio, fee adjusted,
//!   and rotate into the best pair clearing the time-decayed threshold

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ratios::PairRatioTracker;
use super::threshold::GainThreshold;
use super::trader::{TradeOutcome, Trader};
use crate::common::errors::Result;
use crate::common::events::{EventBus, Topic};
use crate::common::traits::Exchange;
use crate::common::types::{CurrentCoin, Diff, PairRatio};
use crate::storage::Repository;

/// Older ratio samples are ignored when picking a first coin
pub const BOOTSTRAP_STALENESS_MINUTES: i64 = 5;

/// Window used to average a comparison ratio for a pair never jumped into
const FALLBACK_WINDOW_START_MINUTES: i64 = 15;
const FALLBACK_WINDOW_END_SECONDS: i64 = 5;

/// Result of one decision cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No price batch to compute ratios from
    NoRatios,
    /// A rotation is in flight, abstaining
    TradeInProgress,
    /// Nothing worth doing this cycle
    Hold,
    Traded(TradeOutcome),
}

/// Held asset as seen by the decision cycle
#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unpositioned,
    Holding(CurrentCoin),
}

pub struct JumpFinder {
    tracker: PairRatioTracker,
    trader: Arc<Trader>,
    repository: Arc<dyn Repository>,
    exchange: Arc<dyn Exchange>,
    threshold: GainThreshold,
    start_coin: Option<String>,
    started_at: DateTime<Utc>,
}

impl JumpFinder {
    pub fn new(
        repository: Arc<dyn Repository>,
        exchange: Arc<dyn Exchange>,
        trader: Arc<Trader>,
        threshold: GainThreshold,
        start_coin: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tracker: PairRatioTracker::new(repository.clone(), trader.bridge()),
            trader,
            repository,
            exchange,
            threshold,
            start_coin,
            started_at,
        }
    }

    fn bridge(&self) -> &str {
        self.trader.bridge()
    }

    async fn position(&self) -> Result<Position> {
        if let Some(current) = self.repository.get_current_coin().await? {
            return Ok(Position::Holding(current));
        }
        Ok(match &self.start_coin {
            Some(coin) => Position::Holding(CurrentCoin {
                coin: coin.clone(),
                timestamp: self.started_at,
            }),
            None => Position::Unpositioned,
        })
    }

    /// Run one decision cycle
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let ratios = self.tracker.calculate().await?;

        if self.trader.is_trade_in_progress() {
            debug!("A trade is in progress, skipping jump search");
            return Ok(CycleOutcome::TradeInProgress);
        }
        if ratios.is_empty() {
            warn!("No ratios found, can't look for a better coin");
            return Ok(CycleOutcome::NoRatios);
        }

        match self.position().await? {
            Position::Unpositioned => {
                info!("Never jumped before, looking for a first coin");
                self.find_first_coin(&ratios).await
            }
            Position::Holding(current) if current.coin == self.bridge() => {
                info!("Current coin is the bridge, looking for a new coin");
                self.find_first_coin(&ratios).await
            }
            Position::Holding(current) => self.find_jump(&current, &ratios).await,
        }
    }

    /// Comparison ratio of a candidate, `None` when the pair cannot be judged yet
    async fn comparison_ratio(&self, candidate: &PairRatio) -> Result<Option<Decimal>> {
        let pair = &candidate.pair;
        if !pair.last_jump_ratio.is_zero() {
            return Ok(Some(pair.last_jump_ratio));
        }

        let average = self
            .repository
            .get_avg_pair_ratio_between(
                &pair.from_coin,
                &pair.to_coin,
                candidate.timestamp - Duration::minutes(FALLBACK_WINDOW_START_MINUTES),
                candidate.timestamp - Duration::seconds(FALLBACK_WINDOW_END_SECONDS),
            )
            .await?;
        match average {
            Some(avg) if !avg.is_zero() => {
                info!(pair = %pair.log_symbol(), %avg, "No jump ratio yet, using last 15 min average");
                Ok(Some(avg))
            }
            _ => {
                warn!(pair = %pair.log_symbol(), "No jump ratio and no recent history, ignoring pair");
                Ok(None)
            }
        }
    }

    async fn find_jump(&self, current: &CurrentCoin, ratios: &[PairRatio]) -> Result<CycleOutcome> {
        let now = ratios[0].timestamp;
        let wanted = self.threshold.wanted_diff(current.timestamp, now);
        debug!(coin = %current.coin, %wanted, "Looking for a jump");

        let mut best: Option<(&PairRatio, Decimal)> = None;
        let mut diffs = Vec::with_capacity(ratios.len());
        for candidate in ratios {
            let pair = &candidate.pair;
            let comparison = match self.comparison_ratio(candidate).await {
                Ok(Some(ratio)) => ratio,
                Ok(None) => continue,
                Err(e) => {
                    error!(pair = %pair.log_symbol(), "Failed to get comparison ratio, ignoring: {}", e);
                    continue;
                }
            };

            let fee = self
                .exchange
                .jump_fee_multiplier(&pair.from_coin, &pair.to_coin, self.bridge());
            let diff = fee * candidate.ratio / comparison;

            diffs.push(Diff {
                from_coin: pair.from_coin.clone(),
                to_coin: pair.to_coin.clone(),
                timestamp: now,
                diff,
                needed_diff: wanted,
            });

            if pair.from_coin != current.coin {
                continue;
            }
            if diff < wanted {
                debug!(
                    pair = %pair.log_symbol(),
                    current_ratio = %candidate.ratio,
                    %comparison,
                    %diff,
                    %fee,
                    "Pair is not good"
                );
                continue;
            }
            info!(
                pair = %pair.log_symbol(),
                current_ratio = %candidate.ratio,
                %comparison,
                %diff,
                %fee,
                "Pair is good"
            );
            if best.map_or(true, |(_, best_diff)| diff > best_diff) {
                best = Some((candidate, diff));
            }
        }

        if let Err(e) = self.repository.replace_all_diffs(&diffs).await {
            warn!("Failed to store diffs: {}", e);
        }

        let Some((best, diff)) = best else {
            debug!(coin = %current.coin, "No jump found");
            return Ok(CycleOutcome::Hold);
        };
        info!(pair = %best.pair.log_symbol(), %diff, "Jumping");
        Ok(CycleOutcome::Traded(self.trader.jump(&best.pair).await?))
    }

    /// Pick a coin to buy from the bridge: the largest recent ratio improvement
    async fn find_first_coin(&self, ratios: &[PairRatio]) -> Result<CycleOutcome> {
        let now = ratios[0].timestamp;
        let previous = self.repository.get_last_pair_ratios_before(now).await?;
        if previous.is_empty() {
            warn!("No previous ratios yet, will check again next tick");
            return Ok(CycleOutcome::Hold);
        }
        let previous: HashMap<(&str, &str), _> = previous
            .iter()
            .map(|h| ((h.from_coin.as_str(), h.to_coin.as_str()), h))
            .collect();

        let oldest_allowed = now - Duration::minutes(BOOTSTRAP_STALENESS_MINUTES);
        let mut best: Option<(&PairRatio, Decimal)> = None;
        for candidate in ratios {
            let key = (candidate.pair.from_coin.as_str(), candidate.pair.to_coin.as_str());
            let Some(last) = previous.get(&key) else {
                continue;
            };
            if last.timestamp < oldest_allowed {
                continue;
            }
            let Some(diff) = candidate.ratio.checked_div(last.ratio) else {
                continue;
            };
            if diff <= Decimal::ONE {
                continue;
            }
            if best.map_or(true, |(_, best_diff)| diff > best_diff) {
                best = Some((candidate, diff));
            }
        }

        let Some((best, diff)) = best else {
            info!("No interesting coin to buy, skipping this tick");
            return Ok(CycleOutcome::Hold);
        };
        let coin = best.pair.to_coin.clone();
        info!(pair = %best.pair.log_symbol(), %diff, "Best pair from bridge, buying {}", coin);
        Ok(CycleOutcome::Traded(self.trader.buy_from_bridge(&coin).await?))
    }

    /// Run a decision cycle on every "prices fetched" event until `cancel` fires
    pub fn start(self: Arc<Self>, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let subscription = bus.subscribe(Topic::PricesFetched);
        tokio::spawn(async move {
            subscription
                .run(cancel, |_| {
                    let finder = self.clone();
                    async move {
                        match finder.run_cycle().await {
                            Ok(outcome) => debug!(?outcome, "Decision cycle done"),
                            Err(e) => error!("Decision cycle failed: {}", e),
                        }
                    }
                })
                .await;
        })
    }
}
