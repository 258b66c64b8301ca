//! Configuration types

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::errors::{EngineError, Result};
use crate::common::notifier::NotificationLevel;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchange access
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Bridge, coin universe and order handling
    pub trading: TradingConfig,
    /// Rotation threshold
    #[serde(default)]
    pub jump: JumpConfig,
    /// Periodic task intervals
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Database configuration (optional, in-memory store when absent)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Historical replay settings
    #[serde(default)]
    pub backtest: Option<BacktestConfig>,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

impl AppConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let trading = &self.trading;
        if trading.bridge.trim().is_empty() {
            return Err(EngineError::Configuration("bridge must not be empty".to_string()));
        }
        if trading.coins.len() < 2 {
            return Err(EngineError::Configuration(
                "at least two coins are needed to rotate".to_string(),
            ));
        }
        if trading.coins.iter().any(|c| c == &trading.bridge) {
            return Err(EngineError::Configuration(format!(
                "bridge {} cannot also be a traded coin",
                trading.bridge
            )));
        }
        if let Some(start) = &trading.start_coin {
            if !trading.coins.contains(start) && start != &trading.bridge {
                return Err(EngineError::Configuration(format!(
                    "start coin {} is not among the configured coins",
                    start
                )));
            }
        }
        if self.jump.after_seconds == 0 {
            return Err(EngineError::Configuration(
                "jump.after_seconds must be greater than zero".to_string(),
            ));
        }
        if self.jump.min > self.jump.when_gain {
            return Err(EngineError::Configuration(
                "jump.min cannot be greater than jump.when_gain".to_string(),
            ));
        }
        if self.jump.decrease_by < Decimal::ZERO {
            return Err(EngineError::Configuration(
                "jump.decrease_by cannot be negative".to_string(),
            ));
        }
        if let Some(backtest) = &self.backtest {
            if backtest.end <= backtest.start {
                return Err(EngineError::Configuration(
                    "backtest.end must be after backtest.start".to_string(),
                ));
            }
            if backtest.step_minutes == 0 {
                return Err(EngineError::Configuration(
                    "backtest.step_minutes must be greater than zero".to_string(),
                ));
            }
            if let (Some(replay), Some(live)) = (&backtest.database, &self.database) {
                if replay.url == live.url {
                    return Err(EngineError::Configuration(
                        "backtest.database must not be the live database".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Binance platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for signed requests
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret used to sign requests
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Base URL of the spot REST API
    #[serde(default = "default_binance_rest_url")]
    pub rest_url: String,
    /// Use the spot testnet instead of `rest_url`
    #[serde(default)]
    pub testnet: bool,
    /// `recvWindow` sent with signed requests
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            rest_url: default_binance_rest_url(),
            testnet: false,
            recv_window_ms: default_recv_window(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl BinanceConfig {
    /// REST URL actually used, honouring `testnet`
    pub fn effective_rest_url(&self) -> &str {
        if self.testnet {
            BINANCE_TESTNET_URL
        } else {
            &self.rest_url
        }
    }

    pub fn credentials(&self) -> Option<ApiCredentials> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Some(ApiCredentials::new(key.clone(), secret.clone())),
            _ => None,
        }
    }
}

const BINANCE_TESTNET_URL: &str = "https://testnet.binance.vision";

fn default_binance_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    30
}

/// Coin universe and order handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Asset every rotation goes through
    pub bridge: String,
    /// Coins the engine rotates between
    pub coins: Vec<String>,
    /// Coin considered held when nothing was ever bought
    #[serde(default)]
    pub start_coin: Option<String>,
    /// Maximum time to wait for an order to complete
    #[serde(default = "default_trade_timeout")]
    pub trade_timeout_seconds: u64,
    /// Order status polling interval
    #[serde(default = "default_order_refresh")]
    pub order_refresh_ms: u64,
    /// Notification levels forwarded to the operator
    #[serde(default = "default_notification_levels")]
    pub notification_levels: Vec<NotificationLevel>,
    /// Currencies the portfolio value is snapshotted in
    #[serde(default = "default_balance_currencies")]
    pub balance_currencies: Vec<String>,
}

impl TradingConfig {
    pub fn trade_timeout(&self) -> Duration {
        Duration::from_secs(self.trade_timeout_seconds)
    }

    pub fn order_refresh(&self) -> Duration {
        Duration::from_millis(self.order_refresh_ms)
    }

    /// `COINBRIDGE` symbols of every configured coin
    pub fn symbols_with_bridge(&self) -> Vec<String> {
        self.coins
            .iter()
            .map(|c| crate::common::types::symbol(c, &self.bridge))
            .collect()
    }
}

fn default_trade_timeout() -> u64 {
    600
}

fn default_order_refresh() -> u64 {
    15_000
}

fn default_notification_levels() -> Vec<NotificationLevel> {
    vec![NotificationLevel::Medium, NotificationLevel::Major]
}

fn default_balance_currencies() -> Vec<String> {
    vec!["USDT".to_string(), "BTC".to_string()]
}

/// Time-decaying rotation threshold, all gains in percent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpConfig {
    /// Gain required right after a rotation
    #[serde(default = "default_when_gain")]
    pub when_gain: Decimal,
    /// Amount removed from the required gain per elapsed interval
    #[serde(default = "default_decrease_by")]
    pub decrease_by: Decimal,
    /// Length of one decay interval
    #[serde(default = "default_after_seconds")]
    pub after_seconds: u64,
    /// Floor of the required gain
    #[serde(default = "default_min_gain")]
    pub min: Decimal,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            when_gain: default_when_gain(),
            decrease_by: default_decrease_by(),
            after_seconds: default_after_seconds(),
            min: default_min_gain(),
        }
    }
}

impl JumpConfig {
    pub fn after(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.after_seconds as i64)
    }
}

fn default_when_gain() -> Decimal {
    dec!(2)
}

fn default_decrease_by() -> Decimal {
    dec!(0.1)
}

fn default_after_seconds() -> u64 {
    3600
}

fn default_min_gain() -> Decimal {
    dec!(0.5)
}

/// Periodic task intervals in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_price_fetch_interval")]
    pub price_fetch_interval_seconds: u64,
    #[serde(default = "default_fee_refresh_interval")]
    pub fee_refresh_interval_seconds: u64,
    #[serde(default = "default_symbol_infos_interval")]
    pub symbol_infos_refresh_seconds: u64,
    #[serde(default = "default_cleaner_interval")]
    pub cleaner_interval_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            price_fetch_interval_seconds: default_price_fetch_interval(),
            fee_refresh_interval_seconds: default_fee_refresh_interval(),
            symbol_infos_refresh_seconds: default_symbol_infos_interval(),
            cleaner_interval_seconds: default_cleaner_interval(),
        }
    }
}

impl ScheduleConfig {
    pub fn price_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.price_fetch_interval_seconds.max(1))
    }

    pub fn fee_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.fee_refresh_interval_seconds.max(1))
    }

    pub fn symbol_infos_refresh(&self) -> Duration {
        Duration::from_secs(self.symbol_infos_refresh_seconds.max(1))
    }

    pub fn cleaner_interval(&self) -> Duration {
        Duration::from_secs(self.cleaner_interval_seconds.max(1))
    }
}

fn default_price_fetch_interval() -> u64 {
    60
}

fn default_fee_refresh_interval() -> u64 {
    60
}

fn default_symbol_infos_interval() -> u64 {
    300
}

fn default_cleaner_interval() -> u64 {
    6 * 3600
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://data/bot.db?mode=rwc`
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Historical replay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Simulated time between two ticks
    #[serde(default = "default_step_minutes")]
    pub step_minutes: u32,
    /// Bridge balance the simulation starts with
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Candle interval replayed prices are read from
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,
    /// Number of candles fetched per history window
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    /// Store the replay writes to, wiped before every run; kept in memory when unset
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

impl BacktestConfig {
    pub fn step(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.step_minutes as i64)
    }
}

fn default_step_minutes() -> u32 {
    1
}

fn default_initial_balance() -> Decimal {
    dec!(1000)
}

fn default_kline_interval() -> String {
    "1m".to_string()
}

fn default_window_minutes() -> u32 {
    1000
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// API credentials for signed requests
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self { api_key, api_secret }
    }
}
