//! Integration tests for the live exchange against a mocked Binance REST API
//!
//! Every test runs its own `wiremock` server, so they can run in parallel.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use coin_rotator::binance::auth::API_KEY_HEADER;
use coin_rotator::binance::fees::DEFAULT_FEE_MULTIPLIER;
use coin_rotator::config::types::ApiCredentials;
use coin_rotator::{
    BinanceRestClient, EngineError, Event, EventBus, Exchange, FeeCache, LiveExchange, OrderStatus,
    Topic,
};
use common::api_responses;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create a live exchange talking to `server`
fn create_exchange(server: &MockServer, bus: Arc<EventBus>) -> (LiveExchange, Arc<FeeCache>) {
    let rest = BinanceRestClient::new(&server.uri())
        .unwrap()
        .with_credentials(ApiCredentials {
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
        });
    let fees = Arc::new(FeeCache::new());
    let exchange = LiveExchange::from_rest(
        rest,
        fees.clone(),
        bus,
        CancellationToken::new(),
        Duration::from_secs(300),
        Duration::from_secs(5),
        Duration::from_millis(10),
    );
    (exchange, fees)
}

// ============================================================================
// Market Data
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_batch_prices() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .and(query_param("symbols", r#"["NEARUSDT","ADAUSDT"]"#))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"[{"symbol":"NEARUSDT","price":"5.23"},{"symbol":"ADAUSDT","price":"0.4512"}]"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let (exchange, _) = create_exchange(&server, Arc::new(EventBus::default()));
    let prices = exchange
        .get_symbol_prices(&["NEARUSDT".to_string(), "ADAUSDT".to_string()])
        .await
        .unwrap();

    assert_eq!(prices.len(), 2);
    assert_eq!(prices["NEARUSDT"], dec!(5.23));
    assert_eq!(prices["ADAUSDT"], dec!(0.4512));
}

#[test_log::test(tokio::test)]
async fn test_invalid_symbol_falls_back_to_single_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .and(query_param("symbols", r#"["NEARUSDT","FOOUSDT"]"#))
        .respond_with(
            ResponseTemplate::new(400).set_body_raw(api_responses::INVALID_SYMBOL, "application/json"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .and(query_param("symbol", "NEARUSDT"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"symbol":"NEARUSDT","price":"5.23"}"#,
            "application/json",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .and(query_param("symbol", "FOOUSDT"))
        .respond_with(
            ResponseTemplate::new(400).set_body_raw(api_responses::INVALID_SYMBOL, "application/json"),
        )
        .mount(&server)
        .await;

    let bus = Arc::new(EventBus::default());
    let mut not_found = bus.subscribe(Topic::SymbolNotFound);
    let (exchange, _) = create_exchange(&server, bus.clone());

    let prices = exchange
        .get_symbol_prices(&["NEARUSDT".to_string(), "FOOUSDT".to_string()])
        .await
        .unwrap();

    assert_eq!(prices.len(), 1);
    assert_eq!(prices["NEARUSDT"], dec!(5.23));
    assert_eq!(
        not_found.recv().await,
        Some(Event::SymbolNotFound("FOOUSDT".to_string()))
    );
}

#[test_log::test(tokio::test)]
async fn test_historical_price_is_candle_midpoint() {
    let server = MockServer::start().await;
    let at = chrono::Utc.with_ymd_and_hms(2024, 4, 1, 10, 15, 30).unwrap();
    let minute = chrono::Utc.with_ymd_and_hms(2024, 4, 1, 10, 15, 0).unwrap();
    let open_ms = minute.timestamp_millis();

    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("symbol", "NEARUSDT"))
        .and(query_param("interval", "1m"))
        .and(query_param("startTime", open_ms.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            [open_ms, "5.00", "5.50", "4.90", "5.40", "1200.5", open_ms + 59_999, "6300", 12, "0", "0", "0"]
        ])))
        .mount(&server)
        .await;

    let (exchange, _) = create_exchange(&server, Arc::new(EventBus::default()));
    let price = exchange.get_symbol_price_at("NEARUSDT", at).await.unwrap();
    assert_eq!(price, dec!(5.2));
}

#[test_log::test(tokio::test)]
async fn test_missing_candle_is_no_price() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("[]", "application/json"))
        .mount(&server)
        .await;

    let (exchange, _) = create_exchange(&server, Arc::new(EventBus::default()));
    let at = chrono::Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
    let result = exchange.get_symbol_price_at("NEARUSDT", at).await;
    assert!(matches!(result, Err(EngineError::NoPriceAtTime { .. })));
}

#[test_log::test(tokio::test)]
async fn test_symbol_rules_are_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/exchangeInfo"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(api_responses::EXCHANGE_INFO, "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (exchange, _) = create_exchange(&server, Arc::new(EventBus::default()));
    let near = exchange.get_symbol_rules("NEARUSDT").await.unwrap();
    let ada = exchange.get_symbol_rules("ADAUSDT").await.unwrap();

    assert_eq!(near.step_size, dec!(0.1));
    assert_eq!(ada.step_size, dec!(1));
    assert_eq!(near.quote_precision, 8);
    assert!(matches!(
        exchange.get_symbol_rules("FOOUSDT").await,
        Err(EngineError::SymbolNotFound(_))
    ));
}

// ============================================================================
// Account (signed)
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_balances_are_signed_and_filtered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .and(header(API_KEY_HEADER, "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(api_responses::ACCOUNT, "application/json"))
        .mount(&server)
        .await;

    let (exchange, _) = create_exchange(&server, Arc::new(EventBus::default()));
    let balances = tokio_test::assert_ok!(exchange.get_balances().await);

    assert_eq!(balances.len(), 2);
    assert_eq!(balances["USDT"], dec!(100.5));
    assert_eq!(balances["ADA"], dec!(250));
    assert_eq!(exchange.get_balance("NEAR").await.unwrap(), dec!(0));
}

#[test_log::test(tokio::test)]
async fn test_fee_refresh_fills_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sapi/v1/asset/tradeFee"))
        .and(header_exists(API_KEY_HEADER))
        .respond_with(ResponseTemplate::new(200).set_body_raw(api_responses::TRADE_FEES, "application/json"))
        .mount(&server)
        .await;

    let (exchange, fees) = create_exchange(&server, Arc::new(EventBus::default()));
    assert!(matches!(exchange.get_fee("ADAUSDT"), Err(EngineError::FeeUnknown(_))));
    // unknown fees fall back to the default round trip
    assert_eq!(exchange.jump_fee_multiplier("NEAR", "ADA", "USDT"), DEFAULT_FEE_MULTIPLIER);

    exchange.refresh_fees().await.unwrap();
    assert_eq!(fees.len(), 2);
    assert_eq!(exchange.get_fee("ADAUSDT").unwrap(), dec!(0.00075));
    assert_eq!(
        exchange.jump_fee_multiplier("NEAR", "ADA", "USDT"),
        dec!(1) - (dec!(0.001) + dec!(0.00075) - dec!(0.001) * dec!(0.00075))
    );
    assert_eq!(exchange.jump_fee_multiplier("ETH", "ADA", "USDT"), DEFAULT_FEE_MULTIPLIER);
}

// ============================================================================
// Orders
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_buy_places_limit_order_and_waits_for_fill() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(api_responses::ACCOUNT, "application/json"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .and(query_param("symbol", "NEARUSDT"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"symbol":"NEARUSDT","price":"5"}"#,
            "application/json",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/exchangeInfo"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(api_responses::EXCHANGE_INFO, "application/json"),
        )
        .mount(&server)
        .await;
    // 100.5 USDT at 5 is 20.1 NEAR, already on the 0.1 step
    Mock::given(method("POST"))
        .and(path("/api/v3/order"))
        .and(query_param("side", "BUY"))
        .and(query_param("type", "LIMIT"))
        .and(query_param("quantity", "20.1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"symbol":"NEARUSDT","orderId":42,"transactTime":1711965600000}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/order"))
        .and(query_param("orderId", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"symbol":"NEARUSDT","orderId":42,"price":"5","origQty":"20.1","executedQty":"20.1","status":"FILLED","time":1711965600000}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let (exchange, _) = create_exchange(&server, Arc::new(EventBus::default()));
    let result = exchange
        .buy("NEAR", "USDT", &CancellationToken::new())
        .await
        .unwrap();

    let order = result.order.clone().unwrap();
    assert_eq!(order.order_id, 42);
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(result.quantity(), dec!(20.1));
    assert_eq!(result.price(), dec!(5));
}
