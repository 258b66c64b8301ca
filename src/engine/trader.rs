//! Two-leg rotation through the bridge asset
//!
//! A rotation sells the held coin for the bridge, records the bridge as held, buys the target
//! coin and records it as held. Only then does it store the jump and refresh the comparison
//! ratio of every pair rotating into the new coin; failures there are logged. At most one rotation runs at a time; see [`TradeLock`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::common::clock::Clock;
use crate::common::errors::Result;
use crate::common::events::{Event, EventBus};
use crate::common::notifier::NotificationLevel;
use crate::common::traits::{Exchange, Notifier};
use crate::common::types::{log_symbol, symbol, Jump, OrderResult, Pair};
use crate::storage::{PairFilter, Repository};

/// Non-blocking "rotation in progress" flag
#[derive(Debug, Default)]
pub struct TradeLock {
    in_progress: AtomicBool,
}

/// Releases the [`TradeLock`] when dropped
#[derive(Debug)]
pub struct TradeGuard<'a> {
    lock: &'a TradeLock,
}

impl TradeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, `None` when a rotation already holds it
    pub fn try_acquire(&self) -> Option<TradeGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TradeGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

impl Drop for TradeGuard<'_> {
    fn drop(&mut self) {
        self.lock.in_progress.store(false, Ordering::Release);
    }
}

/// What a rotation attempt ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    /// Another rotation holds the lock, nothing was done
    Busy,
    /// The sell leg failed after a partial fill, the coin is still held
    KeptPartialSell { coin: String },
    /// Both legs went through
    Jumped(Jump),
    /// The target coin was bought straight from the bridge
    BoughtFromBridge { coin: String },
}

pub struct Trader {
    exchange: Arc<dyn Exchange>,
    repository: Arc<dyn Repository>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    bridge: String,
    lock: TradeLock,
    cancel: CancellationToken,
}

impl Trader {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        repository: Arc<dyn Repository>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        bridge: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            exchange,
            repository,
            bus,
            clock,
            notifier,
            bridge: bridge.into(),
            lock: TradeLock::new(),
            cancel,
        }
    }

    pub fn is_trade_in_progress(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    #[cfg(test)]
    pub(crate) fn trade_lock(&self) -> &TradeLock {
        &self.lock
    }

    async fn log_balances(&self) {
        match self.exchange.get_balances().await {
            Ok(balances) => info!(?balances, "Balances"),
            Err(e) => error!("Failed to get balances: {}", e),
        }
    }

    fn order_time(&self, order: &OrderResult) -> DateTime<Utc> {
        order.time().unwrap_or_else(|| self.clock.now())
    }

    /// Rotate `pair.from_coin` into `pair.to_coin` through the bridge
    #[instrument(skip(self, pair), fields(from = %pair.from_coin, to = %pair.to_coin))]
    pub async fn jump(&self, pair: &Pair) -> Result<TradeOutcome> {
        let Some(_guard) = self.lock.try_acquire() else {
            return Ok(TradeOutcome::Busy);
        };

        info!("Will jump from {} to {}", pair.from_coin, pair.to_coin);
        self.log_balances().await;

        let sell = match self
            .exchange
            .sell(&pair.from_coin, &self.bridge, &self.cancel)
            .await
        {
            Ok(sell) => sell,
            Err(e) if e.is_partially_executed() => {
                warn!(
                    "Sell is partially executed, staying on {} and selling the rest next jump: {}",
                    pair.from_coin, e
                );
                return Ok(TradeOutcome::KeptPartialSell {
                    coin: pair.from_coin.clone(),
                });
            }
            Err(e) => {
                error!("Failed to sell {}: {}", log_symbol(&pair.from_coin, &self.bridge), e);
                return Err(e);
            }
        };

        // the bridge is what we hold until the buy leg completes
        if let Err(e) = self
            .repository
            .set_current_coin(&self.bridge, self.order_time(&sell))
            .await
        {
            error!("Failed setting current coin to {} during jump, continuing: {}", self.bridge, e);
        }
        info!("Sold {}", pair.from_coin);

        let buy = match self
            .exchange
            .buy(&pair.to_coin, &self.bridge, &self.cancel)
            .await
        {
            Ok(buy) => buy,
            Err(e) if sell.is_partially_executed() => {
                warn!("Buy failed after a partial sell, going on with {}: {}", pair.to_coin, e);
                e.order_result().cloned().unwrap_or_default()
            }
            Err(e) => {
                error!("Failed to buy {}: {}", log_symbol(&pair.to_coin, &self.bridge), e);
                self.notifier.notify(
                    NotificationLevel::Major,
                    &format!(
                        "Sold {} but failed to buy {}, holding {}: {}",
                        pair.from_coin, pair.to_coin, self.bridge, e
                    ),
                );
                return Err(e);
            }
        };
        info!("Bought {}", pair.to_coin);
        let bought_at = self.order_time(&buy);
        self.repository.set_current_coin(&pair.to_coin, bought_at).await?;

        let jump = Jump {
            from_coin: pair.from_coin.clone(),
            to_coin: pair.to_coin.clone(),
            timestamp: bought_at,
            from_price: sell.price(),
            from_quantity: sell.quantity(),
            to_price: buy.price(),
            to_quantity: buy.quantity(),
        };
        if let Err(e) = self.repository.insert_jump(&jump).await {
            error!("Failed to store jump {} -> {}: {}", jump.from_coin, jump.to_coin, e);
        }
        if let Err(e) = self
            .update_pairs_to_coin_ratios(Some(&pair.from_coin), &pair.to_coin, &buy, Some(&sell))
            .await
        {
            error!("Failed to refresh jump ratios into {}: {}", pair.to_coin, e);
        }
        self.log_balances().await;

        self.bus.publish(Event::BalanceChanged);
        self.notifier.notify(
            NotificationLevel::Medium,
            &format!(
                "Jumped from {} to {} ({} {} -> {} {})",
                jump.from_coin, jump.to_coin, jump.from_quantity, jump.from_coin, jump.to_quantity, jump.to_coin
            ),
        );
        Ok(TradeOutcome::Jumped(jump))
    }

    /// Spend the bridge balance on `coin`
    #[instrument(skip(self))]
    pub async fn buy_from_bridge(&self, coin: &str) -> Result<TradeOutcome> {
        let Some(_guard) = self.lock.try_acquire() else {
            return Ok(TradeOutcome::Busy);
        };

        let buy = self
            .exchange
            .buy(coin, &self.bridge, &self.cancel)
            .await
            .map_err(|e| {
                error!("Failed to buy {}: {}", log_symbol(coin, &self.bridge), e);
                e
            })?;
        info!("Bought {}", coin);
        self.repository
            .set_current_coin(coin, self.order_time(&buy))
            .await?;

        if let Err(e) = self.update_pairs_to_coin_ratios(None, coin, &buy, None).await {
            error!("Failed to refresh jump ratios into {}: {}", coin, e);
        }
        self.log_balances().await;

        self.bus.publish(Event::BalanceChanged);
        self.notifier.notify(
            NotificationLevel::Medium,
            &format!("Bought {} {} from {}", buy.quantity(), coin, self.bridge),
        );
        Ok(TradeOutcome::BoughtFromBridge {
            coin: coin.to_string(),
        })
    }

    /// Refresh the comparison ratio of every pair into `to_coin`
    ///
    /// The traded pair (`from_coin` → `to_coin`) gets the executed sell/buy prices; the other
    /// pairs get the current price of their from coin over the buy price.
    pub async fn update_pairs_to_coin_ratios(
        &self,
        from_coin: Option<&str>,
        to_coin: &str,
        buy: &OrderResult,
        sell: Option<&OrderResult>,
    ) -> Result<()> {
        let pairs = self.repository.get_pairs(&PairFilter::to_coin(to_coin)).await?;
        let symbols: Vec<String> = pairs
            .values()
            .map(|p| symbol(&p.from_coin, &self.bridge))
            .collect();
        let prices = self.exchange.get_symbol_prices(&symbols).await?;

        let buy_time = self.order_time(buy);
        let buy_price = buy.price();
        let mut updated = Vec::with_capacity(pairs.len());
        for mut pair in pairs.into_values() {
            let traded = from_coin == Some(pair.from_coin.as_str());
            let numerator = match sell {
                Some(sell) if traded => Some(sell.price()),
                _ => prices.get(&symbol(&pair.from_coin, &self.bridge)).copied(),
            };
            let Some(ratio) = numerator.and_then(|n| n.checked_div(buy_price)) else {
                warn!(pair = %pair.log_symbol(), "No price to refresh jump ratio, keeping previous one");
                continue;
            };

            if traded {
                pair.last_jump = Some(buy_time);
            }
            pair.last_jump_ratio = ratio;
            pair.last_jump_ratio_based_on = Some(buy_time);
            updated.push(pair);
        }

        self.repository.upsert_pairs(&updated).await?;
        Ok(())
    }
}
