//! Binance spot exchange: REST client, signing, fee table and the live `Exchange`

pub mod auth;
pub mod client;
pub mod fees;
pub mod messages;
pub mod order;
pub mod rest;

pub use client::LiveExchange;
pub use fees::FeeCache;
pub use rest::BinanceRestClient;
