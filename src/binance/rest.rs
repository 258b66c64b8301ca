//! REST API client for the Binance spot exchange

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

use super::auth::{signed_query, API_KEY_HEADER};
use super::messages::*;
use crate::common::errors::{EngineError, Result};
use crate::common::traits::OrderApi;
use crate::common::types::{CancelResult, Order, Side};
use crate::config::types::ApiCredentials;

/// Default `recvWindow` for signed requests
const DEFAULT_RECV_WINDOW_MS: u64 = 5000;

/// Maximum candles per klines request
pub const MAX_KLINES_LIMIT: u32 = 1000;

/// REST API client for Binance spot
#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    /// HTTP client
    client: Client,
    /// Base URL of the REST API
    base_url: String,
    /// Optional API credentials for signed endpoints
    credentials: Option<ApiCredentials>,
    /// `recvWindow` sent with signed requests
    recv_window_ms: u64,
}

impl BinanceRestClient {
    /// Create a new REST client (unauthenticated)
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a new REST client with custom timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
        })
    }

    /// Set API credentials for signed requests
    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // Market Data Endpoints (No Authentication Required)
    // ========================================================================

    /// Current price of one symbol
    #[instrument(skip(self))]
    pub async fn get_symbol_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!(
            "{}/api/v3/ticker/price?{}",
            self.base_url,
            encode(&[("symbol", symbol.to_string())])
        );
        debug!("Fetching price from: {}", url);

        let response = self.client.get(&url).send().await?;
        let ticker: TickerPrice = handle_response(response).await?;
        Ok(ticker.price)
    }

    /// Current prices of several symbols in one request
    ///
    /// Fails as a whole with the invalid-symbol error if any symbol is unknown.
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    pub async fn get_symbol_prices(&self, symbols: &[String]) -> Result<Vec<TickerPrice>> {
        let url = format!(
            "{}/api/v3/ticker/price?{}",
            self.base_url,
            encode(&[("symbols", serde_json::to_string(symbols)?)])
        );
        debug!("Fetching batch prices from: {}", url);

        let response = self.client.get(&url).send().await?;
        handle_response(response).await
    }

    /// Trading rules of a set of symbols, every listed symbol when `symbols` is empty
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    pub async fn get_exchange_info(&self, symbols: &[String]) -> Result<Vec<SymbolInfo>> {
        let url = if symbols.is_empty() {
            format!("{}/api/v3/exchangeInfo", self.base_url)
        } else {
            format!(
                "{}/api/v3/exchangeInfo?{}",
                self.base_url,
                encode(&[("symbols", serde_json::to_string(symbols)?)])
            )
        };
        debug!("Fetching exchange info from: {}", url);

        let response = self.client.get(&url).send().await?;
        let info: ExchangeInfoResponse = handle_response(response).await?;
        Ok(info.symbols)
    }

    /// Candles starting at `start`
    #[instrument(skip(self))]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Kline>> {
        let url = format!(
            "{}/api/v3/klines?{}",
            self.base_url,
            encode(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("startTime", start.timestamp_millis().to_string()),
                ("limit", limit.min(MAX_KLINES_LIMIT).to_string()),
            ])
        );
        debug!("Fetching klines from: {}", url);

        let response = self.client.get(&url).send().await?;
        let rows: Vec<Vec<serde_json::Value>> = handle_response(response).await?;
        rows.iter().map(|row| Kline::from_row(row)).collect()
    }

    // ========================================================================
    // Account Endpoints (Signed)
    // ========================================================================

    /// Account balances
    #[instrument(skip(self))]
    pub async fn get_account(&self) -> Result<AccountResponse> {
        self.signed(Method::GET, "/api/v3/account", &[]).await
    }

    /// Fee table of every symbol
    #[instrument(skip(self))]
    pub async fn get_trade_fees(&self) -> Result<Vec<TradeFee>> {
        self.signed(Method::GET, "/sapi/v1/asset/tradeFee", &[]).await
    }

    /// Place a GTC limit order
    #[instrument(skip(self))]
    pub async fn create_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<NewOrderResponse> {
        self.signed(
            Method::POST,
            "/api/v3/order",
            &[
                ("symbol", symbol.to_string()),
                ("side", side.to_string()),
                ("type", "LIMIT".to_string()),
                ("timeInForce", "GTC".to_string()),
                ("quantity", quantity.normalize().to_string()),
                ("price", price.to_string()),
            ],
        )
        .await
    }

    /// Current state of an order
    #[instrument(skip(self))]
    pub async fn query_order(&self, symbol: &str, order_id: i64) -> Result<OrderResponse> {
        self.signed(
            Method::GET,
            "/api/v3/order",
            &[("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
        )
        .await
    }

    /// Cancel an open order
    #[instrument(skip(self))]
    pub async fn delete_order(&self, symbol: &str, order_id: i64) -> Result<CancelOrderResponse> {
        self.signed(
            Method::DELETE,
            "/api/v3/order",
            &[("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
        )
        .await
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let creds = self.credentials.as_ref().ok_or_else(|| {
            EngineError::Authentication("API credentials required for signed endpoint".to_string())
        })?;
        let query = signed_query(
            &creds.api_secret,
            params,
            self.recv_window_ms,
            Utc::now().timestamp_millis(),
        )?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(%method, path, "Sending signed request");

        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, &creds.api_key)
            .send()
            .await?;
        handle_response(response).await
    }
}

#[async_trait]
impl OrderApi for BinanceRestClient {
    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<Order> {
        Ok(self.query_order(symbol, order_id).await?.into())
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<CancelResult> {
        Ok(self.delete_order(symbol, order_id).await?.into())
    }
}

fn encode(params: &[(&str, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Decode a success body, or turn the error body into an `EngineError`
async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
        let retry_after_seconds = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        return Err(EngineError::RateLimit {
            message: body,
            retry_after_seconds,
        });
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorResponse>(&body) {
        Ok(api_error) => Err(EngineError::Api {
            code: api_error.code,
            message: api_error.msg,
        }),
        Err(_) => Err(EngineError::InvalidResponse(format!(
            "Server returned status {}: {}",
            status, body
        ))),
    }
}
