//! Periodic price fetch of every enabled coin against the bridge

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::blacklist::SymbolBlacklist;
use super::spawn_periodic;
use crate::common::clock::Clock;
use crate::common::errors::Result;
use crate::common::events::{Event, EventBus};
use crate::common::traits::Exchange;
use crate::common::types::{symbol, CoinPrice};
use crate::storage::Repository;

pub struct PriceGetter {
    exchange: Arc<dyn Exchange>,
    repository: Arc<dyn Repository>,
    bus: Arc<EventBus>,
    blacklist: Arc<SymbolBlacklist>,
    clock: Arc<dyn Clock>,
    bridge: String,
}

impl PriceGetter {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        repository: Arc<dyn Repository>,
        bus: Arc<EventBus>,
        blacklist: Arc<SymbolBlacklist>,
        clock: Arc<dyn Clock>,
        bridge: impl Into<String>,
    ) -> Self {
        Self {
            exchange,
            repository,
            bus,
            blacklist,
            clock,
            bridge: bridge.into(),
        }
    }

    /// Fetch, store and announce one price batch, returns the number of prices stored
    ///
    /// Every row of the batch shares the same timestamp, which the ratio computation relies on.
    pub async fn fetch_prices(&self) -> Result<usize> {
        let coins = self.repository.get_enabled_coins().await?;
        let blacklisted = self.blacklist.symbols().await?;
        let symbols: Vec<(String, String)> = coins
            .into_iter()
            .map(|coin| (symbol(&coin, &self.bridge), coin))
            .filter(|(sym, _)| !blacklisted.contains(sym))
            .collect();
        let names: Vec<String> = symbols.iter().map(|(sym, _)| sym.clone()).collect();

        let prices = self.exchange.get_symbol_prices(&names).await?;
        let now = self.clock.now();
        let rows: Vec<CoinPrice> = symbols
            .into_iter()
            .filter_map(|(sym, coin)| {
                prices.get(&sym).map(|price| CoinPrice {
                    coin,
                    alt_coin: self.bridge.clone(),
                    price: *price,
                    timestamp: now,
                    averaged: false,
                })
            })
            .collect();

        self.repository.upsert_coin_prices(&rows).await?;
        debug!(count = rows.len(), "Saved coin prices");
        self.bus.publish(Event::PricesFetched);
        Ok(rows.len())
    }

    pub fn start(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        spawn_periodic("price_getter", period, true, cancel, move || {
            let getter = self.clone();
            async move {
                if let Err(e) = getter.fetch_prices().await {
                    error!("Failed to fetch coin prices: {}", e);
                }
            }
        })
    }
}
