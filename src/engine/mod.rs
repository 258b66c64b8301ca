//! Rotation engine: decision cycle, trade execution and the periodic processes feeding them

pub mod balance_saver;
pub mod blacklist;
pub mod cleaner;
pub mod fee_getter;
pub mod jump_finder;
pub mod pairs;
pub mod price_getter;
pub mod ratios;
pub mod threshold;
pub mod trader;

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use balance_saver::BalanceSaver;
pub use blacklist::SymbolBlacklist;
pub use cleaner::Cleaner;
pub use fee_getter::FeeGetter;
pub use jump_finder::{CycleOutcome, JumpFinder};
pub use pairs::{initialize_pairs, load_coins};
pub use price_getter::PriceGetter;
pub use ratios::PairRatioTracker;
pub use threshold::GainThreshold;
pub use trader::{TradeLock, TradeOutcome, Trader};

/// Run `job` every `period` until `cancel` fires
///
/// With `immediate` the first run happens right away, otherwise after one period. A run in
/// progress is awaited before the task checks for cancellation again.
pub(crate) fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    immediate: bool,
    cancel: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let first = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(process = name, "Periodic process stopped");
                    break;
                }
                _ = ticker.tick() => job().await,
            }
        }
    })
}
