//! Daily compaction of the price and ratio series

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::spawn_periodic;
use crate::common::clock::Clock;
use crate::common::errors::Result;
use crate::storage::{start_of_day, CompactionStats, Repository};

pub struct Cleaner {
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
}

impl Cleaner {
    pub fn new(repository: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Replace raw rows older than today with hourly averages
    pub async fn clean(&self) -> Result<(CompactionStats, CompactionStats)> {
        let before = start_of_day(self.clock.now());
        let ratios = self.repository.compact_pair_history(before).await?;
        let prices = self.repository.compact_coin_prices(before).await?;
        info!(
            %before,
            ratios_deleted = ratios.deleted,
            ratios_inserted = ratios.inserted,
            prices_deleted = prices.deleted,
            prices_inserted = prices.inserted,
            "Compacted history"
        );
        Ok((ratios, prices))
    }

    pub fn start(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        spawn_periodic("cleaner", period, true, cancel, move || {
            let cleaner = self.clone();
            async move {
                if let Err(e) = cleaner.clean().await {
                    error!("Failed to compact history: {}", e);
                }
            }
        })
    }
}
