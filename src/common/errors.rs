//! Error types for the application

use thiserror::Error;

use super::types::OrderResult;

/// Result type alias using our EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Binance error code for a symbol the exchange does not list
pub const API_ERROR_INVALID_SYMBOL: i64 = -1121;

/// Binance error code for an order quantity outside the lot-size filter
pub const API_ERROR_INVALID_QUANTITY: i64 = -1013;

/// Main error type for engine and client operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Error body returned by the exchange
    #[error("Exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Rate limiting errors
    #[error("Rate limit exceeded: {message}, retry after {retry_after_seconds:?} seconds")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Trading rules unknown for a symbol
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Fee table has no entry for the symbol yet
    #[error("Fee unknown for symbol {0}")]
    FeeUnknown(String),

    /// No price available for the symbol at the requested time
    #[error("No price found for {symbol} at {at}")]
    NoPriceAtTime {
        symbol: String,
        at: chrono::DateTime<chrono::Utc>,
    },

    /// Not enough history to decide anything
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Order reached Rejected, Canceled or Expired
    #[error("Order {order_id} on {symbol} ended as {reason}")]
    OrderFailed {
        symbol: String,
        order_id: i64,
        reason: String,
        last: Box<OrderResult>,
    },

    /// Order did not reach a terminal state before the trade timeout
    #[error("Order {order_id} on {symbol} timed out waiting for completion")]
    OrderTimeout {
        symbol: String,
        order_id: i64,
        last: Box<OrderResult>,
    },

    /// Shutdown was requested while an order was still open
    #[error("Order {order_id} on {symbol} interrupted by shutdown")]
    OrderInterrupted {
        symbol: String,
        order_id: i64,
        last: Box<OrderResult>,
    },

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this is the exchange's "invalid symbol" error
    pub fn is_invalid_symbol(&self) -> bool {
        matches!(self, EngineError::Api { code, .. } if *code == API_ERROR_INVALID_SYMBOL)
    }

    /// Last known order state for order-related failures
    pub fn order_result(&self) -> Option<&OrderResult> {
        match self {
            EngineError::OrderFailed { last, .. }
            | EngineError::OrderTimeout { last, .. }
            | EngineError::OrderInterrupted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Whether the failed order still moved some quantity
    pub fn is_partially_executed(&self) -> bool {
        self.order_result()
            .map(|r| r.is_partially_executed())
            .unwrap_or(false)
    }
}
