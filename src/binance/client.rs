//! Live exchange built on the Binance REST client

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use futures_util::FutureExt;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::fees::FeeCache;
use super::order::wait_for_order;
use super::rest::BinanceRestClient;
use crate::common::errors::{EngineError, Result};
use crate::common::events::{Event, EventBus};
use crate::common::refresher::{RefreshFn, Refresher};
use crate::common::traits::Exchange;
use crate::common::types::{step_size_format, symbol, OrderResult, Side, SymbolRules};
use crate::config::types::AppConfig;

/// Symbol -> trading rules
pub type SymbolRulesTable = HashMap<String, SymbolRules>;

/// Exchange implementation talking to Binance
pub struct LiveExchange {
    /// REST API client
    rest: BinanceRestClient,
    /// Fee table refreshed by the fee getter
    fees: Arc<FeeCache>,
    /// Trading rules, refreshed in the background
    symbol_rules: Refresher<SymbolRulesTable>,
    /// Where invalid symbols are reported
    bus: Arc<EventBus>,
    trade_timeout: Duration,
    order_refresh: Duration,
}

impl LiveExchange {
    /// Create the live exchange from configuration
    pub fn new(
        config: &AppConfig,
        fees: Arc<FeeCache>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut rest = BinanceRestClient::with_timeout(
            config.binance.effective_rest_url(),
            Duration::from_secs(config.binance.request_timeout_seconds),
        )?
        .with_recv_window(config.binance.recv_window_ms);
        if let Some(creds) = config.binance.credentials() {
            rest = rest.with_credentials(creds);
        }

        Ok(Self::from_rest(
            rest,
            fees,
            bus,
            cancel,
            config.schedule.symbol_infos_refresh(),
            config.trading.trade_timeout(),
            config.trading.order_refresh(),
        ))
    }

    /// Assemble from an existing REST client
    pub fn from_rest(
        rest: BinanceRestClient,
        fees: Arc<FeeCache>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
        rules_refresh: Duration,
        trade_timeout: Duration,
        order_refresh: Duration,
    ) -> Self {
        let fetch_client = rest.clone();
        let fetch: RefreshFn<SymbolRulesTable> = Arc::new(move || {
            let client = fetch_client.clone();
            async move {
                let infos = client.get_exchange_info(&[]).await?;
                let mut table = HashMap::with_capacity(infos.len());
                for info in infos {
                    let name = info.symbol.clone();
                    match info.into_rules() {
                        Ok(rules) => {
                            table.insert(name, rules);
                        }
                        Err(e) => debug!(symbol = %name, "Skipping symbol rules: {}", e),
                    }
                }
                Ok(table)
            }
            .boxed()
        });

        Self {
            rest,
            fees,
            symbol_rules: Refresher::new("symbol_infos", rules_refresh, cancel, fetch),
            bus,
            trade_timeout,
            order_refresh,
        }
    }

    /// Underlying REST client
    pub fn rest(&self) -> &BinanceRestClient {
        &self.rest
    }

    /// Fetch symbols one by one, reporting and skipping invalid ones
    async fn get_prices_one_by_one(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut prices = HashMap::with_capacity(symbols.len());
        for sym in symbols {
            match self.rest.get_symbol_price(sym).await {
                Ok(price) => {
                    prices.insert(sym.clone(), price);
                }
                Err(e) if e.is_invalid_symbol() => {
                    warn!(symbol = %sym, "Exchange does not know symbol, skipping it");
                    self.bus.publish(Event::SymbolNotFound(sym.clone()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(prices)
    }

    #[instrument(skip(self, cancel))]
    async fn trade(
        &self,
        coin: &str,
        alt_coin: &str,
        side: Side,
        cancel: &CancellationToken,
    ) -> Result<OrderResult> {
        let balances = self.get_balances().await.map_err(|e| {
            error!("Failed to get balances: {}", e);
            e
        })?;
        let balance_of = |c: &str| balances.get(c).copied().unwrap_or(Decimal::ZERO);
        let balance = match side {
            Side::Buy => balance_of(alt_coin),
            Side::Sell => balance_of(coin),
        };

        let sym = symbol(coin, alt_coin);
        let price = self.rest.get_symbol_price(&sym).await?;
        let rules = self.get_symbol_rules(&sym).await?;

        let raw_quantity = match side {
            Side::Buy => balance.checked_div(price).unwrap_or(Decimal::ZERO),
            Side::Sell => balance,
        };
        let quantity = step_size_format(raw_quantity, rules.step_size);
        if quantity.is_zero() {
            return Err(EngineError::InsufficientData(format!(
                "nothing to {} on {}: balance {} below step {}",
                side, sym, balance, rules.step_size
            )));
        }

        info!(
            "I have {} {} and {} {}. I'll {} {} {} at price {}",
            balance_of(coin),
            coin,
            balance_of(alt_coin),
            alt_coin,
            side,
            quantity,
            coin,
            price
        );

        let limit_price =
            price.round_dp_with_strategy(rules.quote_precision, RoundingStrategy::MidpointAwayFromZero);
        let created = self
            .rest
            .create_limit_order(&sym, side, quantity, limit_price)
            .await?;

        wait_for_order(
            &self.rest,
            &sym,
            created.order_id,
            cancel,
            self.trade_timeout,
            self.order_refresh,
        )
        .await
    }
}

#[async_trait]
impl Exchange for LiveExchange {
    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        let account = self.rest.get_account().await?;
        Ok(account
            .balances
            .into_iter()
            .filter(|b| !b.free.is_zero())
            .map(|b| (b.asset, b.free))
            .collect())
    }

    async fn get_symbol_price(&self, symbol: &str) -> Result<Decimal> {
        self.rest.get_symbol_price(symbol).await.map_err(|e| {
            if e.is_invalid_symbol() {
                self.bus.publish(Event::SymbolNotFound(symbol.to_string()));
            }
            e
        })
    }

    async fn get_symbol_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        match self.rest.get_symbol_prices(symbols).await {
            Ok(tickers) => Ok(tickers.into_iter().map(|t| (t.symbol, t.price)).collect()),
            Err(e) if e.is_invalid_symbol() => {
                warn!("Batch price fetch hit an invalid symbol, fetching one by one");
                self.get_prices_one_by_one(symbols).await
            }
            Err(e) => Err(e),
        }
    }

    async fn get_symbol_price_at(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal> {
        let minute = at
            .duration_trunc(chrono::Duration::minutes(1))
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let klines = self.rest.get_klines(symbol, "1m", minute, 1).await?;
        klines
            .into_iter()
            .find(|k| k.open_time == minute)
            .map(|k| k.mid_price())
            .ok_or_else(|| EngineError::NoPriceAtTime {
                symbol: symbol.to_string(),
                at,
            })
    }

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        let table = self.symbol_rules.get().await?;
        table
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))
    }

    async fn refresh_fees(&self) -> Result<()> {
        let fees = self.rest.get_trade_fees().await?;
        let updated = self
            .fees
            .update(fees.into_iter().map(|f| (f.symbol, f.maker_commission)));
        debug!(updated, "Refreshed trade fees");
        Ok(())
    }

    fn get_fee(&self, symbol: &str) -> Result<Decimal> {
        self.fees.get(symbol)
    }

    async fn buy(&self, coin: &str, alt_coin: &str, cancel: &CancellationToken) -> Result<OrderResult> {
        self.trade(coin, alt_coin, Side::Buy, cancel).await
    }

    async fn sell(
        &self,
        coin: &str,
        alt_coin: &str,
        cancel: &CancellationToken,
    ) -> Result<OrderResult> {
        self.trade(coin, alt_coin, Side::Sell, cancel).await
    }
}
