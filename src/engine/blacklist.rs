//! Trading symbols the exchange does not know
//!
//! Learned from "symbol not found" events and persisted, so price fetches stop asking for them.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::clock::Clock;
use crate::common::errors::Result;
use crate::common::events::{Event, EventBus, Topic};
use crate::storage::Repository;

pub struct SymbolBlacklist {
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    /// Loaded from the store on first use
    cache: RwLock<Option<HashSet<String>>>,
}

impl SymbolBlacklist {
    pub fn new(repository: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            cache: RwLock::new(None),
        }
    }

    /// Every blacklisted symbol
    pub async fn symbols(&self) -> Result<HashSet<String>> {
        if let Some(cache) = self.cache.read().await.as_ref() {
            return Ok(cache.clone());
        }
        let mut cache = self.cache.write().await;
        if cache.is_none() {
            let stored = self.repository.get_blacklisted_symbols().await?;
            *cache = Some(stored.into_iter().collect());
        }
        Ok(cache.clone().unwrap_or_default())
    }

    pub async fn contains(&self, symbol: &str) -> Result<bool> {
        Ok(self.symbols().await?.contains(symbol))
    }

    /// Persist `symbol` and add it to the cache
    pub async fn add(&self, symbol: &str) -> Result<()> {
        self.repository
            .blacklist_symbol(symbol, self.clock.now())
            .await?;
        // make sure the cache holds the stored set before extending it
        self.symbols().await?;
        if let Some(cache) = self.cache.write().await.as_mut() {
            cache.insert(symbol.to_string());
        }
        info!(symbol, "Blacklisted symbol");
        Ok(())
    }

    /// Blacklist every symbol reported on the bus until `cancel` fires
    pub fn start(self: Arc<Self>, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let subscription = bus.subscribe(Topic::SymbolNotFound);
        tokio::spawn(async move {
            subscription
                .run(cancel, |event| {
                    let blacklist = self.clone();
                    async move {
                        if let Event::SymbolNotFound(symbol) = event {
                            if let Err(e) = blacklist.add(&symbol).await {
                                warn!(%symbol, "Failed to blacklist symbol, will do next time: {}", e);
                            }
                        }
                    }
                })
                .await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::SystemClock;
    use crate::storage::MemoryRepository;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cache_loads_from_store() {
        let repo = Arc::new(MemoryRepository::new());
        repo.blacklist_symbol("FOOUSDT", chrono::Utc::now()).await.unwrap();

        let blacklist = SymbolBlacklist::new(repo.clone(), Arc::new(SystemClock));
        assert!(blacklist.contains("FOOUSDT").await.unwrap());
        assert!(!blacklist.contains("BARUSDT").await.unwrap());

        blacklist.add("BARUSDT").await.unwrap();
        assert!(blacklist.contains("BARUSDT").await.unwrap());
        assert_eq!(repo.get_blacklisted_symbols().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_learns_from_bus() {
        let repo = Arc::new(MemoryRepository::new());
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let blacklist = Arc::new(SymbolBlacklist::new(repo.clone(), Arc::new(SystemClock)));
        let handle = blacklist.clone().start(&bus, cancel.clone());

        assert_eq!(bus.publish(Event::SymbolNotFound("XYZUSDT".to_string())), 1);
        for _ in 0..50 {
            if blacklist.contains("XYZUSDT").await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(blacklist.contains("XYZUSDT").await.unwrap());

        cancel.cancel();
        handle.await.unwrap();
    }
}
