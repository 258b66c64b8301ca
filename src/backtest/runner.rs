//! Deterministic replay of the engine over a past time window

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::clock::{Clock, SteppedClock};
use crate::common::errors::Result;
use crate::common::events::EventBus;
use crate::common::notifier::TracingNotifier;
use crate::common::traits::Exchange;
use crate::config::types::AppConfig;
use crate::engine::{
    initialize_pairs, load_coins, BalanceSaver, CycleOutcome, GainThreshold, JumpFinder,
    PriceGetter, SymbolBlacklist, Trader,
};
use crate::storage::Repository;

/// Log progress every this many steps
const PROGRESS_EVERY: u64 = 60;

/// Summary of a finished replay
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    pub steps: u64,
    pub jumps: usize,
    pub current_coin: Option<String>,
    pub balances: HashMap<String, Decimal>,
    pub value_in_bridge: Decimal,
}

pub struct BacktestRunner {
    clock: Arc<SteppedClock>,
    exchange: Arc<dyn Exchange>,
    repository: Arc<dyn Repository>,
    blacklist: Arc<SymbolBlacklist>,
    price_getter: PriceGetter,
    jump_finder: JumpFinder,
    balance_saver: BalanceSaver,
    bridge: String,
    coins: Vec<String>,
}

impl BacktestRunner {
    /// Wire the engine against `exchange` with every component reading `clock`
    ///
    /// `start_coin` is the coin the replay starts holding, `None` starts from the bridge.
    pub fn new(
        config: &AppConfig,
        exchange: Arc<dyn Exchange>,
        repository: Arc<dyn Repository>,
        clock: Arc<SteppedClock>,
        start_coin: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        let trading = &config.trading;
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        // nothing subscribes, the runner drives every step itself
        let bus = Arc::new(EventBus::default());
        let blacklist = Arc::new(SymbolBlacklist::new(repository.clone(), dyn_clock.clone()));
        let notifier = Arc::new(TracingNotifier::new(trading.notification_levels.clone()));

        let trader = Arc::new(Trader::new(
            exchange.clone(),
            repository.clone(),
            bus.clone(),
            dyn_clock.clone(),
            notifier,
            trading.bridge.clone(),
            cancel,
        ));
        let jump_finder = JumpFinder::new(
            repository.clone(),
            exchange.clone(),
            trader,
            GainThreshold::from_config(&config.jump),
            start_coin,
            clock.start(),
        );
        let price_getter = PriceGetter::new(
            exchange.clone(),
            repository.clone(),
            bus,
            blacklist.clone(),
            dyn_clock.clone(),
            trading.bridge.clone(),
        );
        let balance_saver = BalanceSaver::new(
            exchange.clone(),
            repository.clone(),
            dyn_clock,
            trading.bridge.clone(),
            trading.balance_currencies.clone(),
        );

        Self {
            clock,
            exchange,
            repository,
            blacklist,
            price_getter,
            jump_finder,
            balance_saver,
            bridge: trading.bridge.clone(),
            coins: trading.coins.clone(),
        }
    }

    /// Step through the whole window, then report
    ///
    /// Stops early when `cancel` fires and reports what was reached.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BacktestReport> {
        info!(
            start = %self.clock.start(),
            end = %self.clock.end(),
            steps = self.clock.total_steps(),
            coins = ?self.coins,
            "Starting backtest"
        );
        load_coins(self.repository.as_ref(), &self.coins, self.clock.now()).await?;
        initialize_pairs(
            self.repository.as_ref(),
            self.exchange.as_ref(),
            &self.blacklist,
            &self.bridge,
            self.clock.now(),
        )
        .await?;

        let mut steps = 0u64;
        while !self.clock.is_done() {
            if cancel.is_cancelled() {
                warn!(at = %self.clock.now(), "Backtest interrupted");
                break;
            }
            self.step().await;
            steps += 1;
            if steps % PROGRESS_EVERY == 0 {
                info!(at = %self.clock.now(), steps, "Backtest progress");
            }
            self.clock.advance();
        }

        let report = self.report(steps).await?;
        info!(
            steps = report.steps,
            jumps = report.jumps,
            current_coin = ?report.current_coin,
            balances = ?report.balances,
            value = %report.value_in_bridge,
            bridge = %self.bridge,
            "Backtest finished"
        );
        Ok(report)
    }

    /// One simulated tick: fetch prices, then run the decision cycle on them
    async fn step(&self) {
        let now = self.clock.now();
        if let Err(e) = self.price_getter.fetch_prices().await {
            warn!(%now, "Price fetch failed: {}", e);
            return;
        }
        match self.jump_finder.run_cycle().await {
            Ok(CycleOutcome::Traded(outcome)) => {
                info!(%now, ?outcome, "Traded");
                if let Err(e) = self.balance_saver.save().await {
                    warn!(%now, "Failed to save balance: {}", e);
                }
            }
            Ok(outcome) => debug!(%now, ?outcome, "Decision cycle done"),
            Err(e) => warn!(%now, "Decision cycle failed: {}", e),
        }
        match self.exchange.get_balances().await {
            Ok(balances) => debug!(%now, ?balances, "Balances"),
            Err(e) => debug!(%now, "Balances unavailable: {}", e),
        }
    }

    async fn report(&self, steps: u64) -> Result<BacktestReport> {
        let start = self.clock.start();
        let jumps = self
            .repository
            .get_all_jumps()
            .await?
            .iter()
            .filter(|j| j.timestamp >= start)
            .count();
        let current_coin = self.repository.get_current_coin().await?.map(|c| c.coin);
        let balances = self.exchange.get_balances().await?;
        let value_in_bridge = self.balance_saver.total_in_bridge().await?;
        Ok(BacktestReport {
            steps,
            jumps,
            current_coin,
            balances,
            value_in_bridge,
        })
    }
}
