//! Account value snapshots taken after every balance change

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::common::clock::Clock;
use crate::common::errors::Result;
use crate::common::events::{EventBus, Topic};
use crate::common::traits::Exchange;
use crate::common::types::{symbol, BalanceHistory};
use crate::storage::Repository;

pub struct BalanceSaver {
    exchange: Arc<dyn Exchange>,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    bridge: String,
    /// Currencies the total value is expressed in
    currencies: Vec<String>,
}

impl BalanceSaver {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        bridge: impl Into<String>,
        currencies: Vec<String>,
    ) -> Self {
        Self {
            exchange,
            repository,
            clock,
            bridge: bridge.into(),
            currencies,
        }
    }

    /// Total account value expressed in the bridge coin
    ///
    /// Assets without a bridge market are left out of the total.
    pub async fn total_in_bridge(&self) -> Result<Decimal> {
        let balances = self.exchange.get_balances().await?;
        let mut total = Decimal::ZERO;
        for (asset, amount) in balances {
            if asset == self.bridge {
                total += amount;
                continue;
            }
            match self.exchange.get_symbol_price(&symbol(&asset, &self.bridge)).await {
                Ok(price) => total += amount * price,
                Err(e) => warn!(%asset, "Leaving asset out of account value: {}", e),
            }
        }
        Ok(total)
    }

    /// Value the account in every configured currency and append the snapshot
    pub async fn save(&self) -> Result<BalanceHistory> {
        let total = self.total_in_bridge().await?;
        let mut values = BTreeMap::new();
        for currency in &self.currencies {
            if *currency == self.bridge {
                values.insert(currency.clone(), total);
                continue;
            }
            match self.exchange.get_symbol_price(&symbol(currency, &self.bridge)).await {
                Ok(price) if !price.is_zero() => {
                    values.insert(currency.clone(), total / price);
                }
                Ok(_) => warn!(%currency, "Zero price, skipping currency"),
                Err(e) => warn!(%currency, "Failed to value balance: {}", e),
            }
        }

        let row = BalanceHistory {
            timestamp: self.clock.now(),
            values,
        };
        self.repository.insert_balance_history(&row).await?;
        info!(values = ?row.values, "Saved balance");
        Ok(row)
    }

    pub fn start(self: Arc<Self>, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let subscription = bus.subscribe(Topic::BalanceChanged);
        tokio::spawn(async move {
            subscription
                .run(cancel, |_| {
                    let saver = self.clone();
                    async move {
                        if let Err(e) = saver.save().await {
                            error!("Failed to save balance: {}", e);
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
    use crate::common::errors::EngineError;
    use crate::common::traits::MockExchange;
    use crate::storage::MemoryRepository;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn exchange() -> MockExchange {
        let mut exchange = MockExchange::new();
        exchange.expect_get_balances().returning(|| {
            Ok(HashMap::from([
                ("USDT".to_string(), dec!(10)),
                ("NEAR".to_string(), dec!(20)),
                ("DUST".to_string(), dec!(3)),
            ]))
        });
        exchange.expect_get_symbol_price().returning(|sym| match sym {
            "NEARUSDT" => Ok(dec!(5)),
            "BTCUSDT" => Ok(dec!(55)),
            other => Err(EngineError::Api {
                code: -1121,
                message: format!("Invalid symbol {}", other),
            }),
        });
        exchange
    }

    #[tokio::test]
    async fn test_save_values_account_in_each_currency() {
        let repo = Arc::new(MemoryRepository::new());
        let saver = BalanceSaver::new(
            Arc::new(exchange()),
            repo.clone(),
            Arc::new(SystemClock),
            "USDT",
            vec!["USDT".to_string(), "BTC".to_string()],
        );

        let row = saver.save().await.unwrap();
        assert_eq!(
            row.values,
            BTreeMap::from([("BTC".to_string(), dec!(2)), ("USDT".to_string(), dec!(110))])
        );

        let stored = repo.get_balance_history(10).await.unwrap();
        assert_eq!(stored, vec![row]);
    }
}
