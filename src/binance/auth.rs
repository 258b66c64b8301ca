//! Request signing for the Binance spot API

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::errors::{EngineError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// HMAC-SHA256 of the query string, hex encoded
///
/// # Arguments
/// * `secret` - API secret (raw string)
/// * `query` - Url-encoded query string, `timestamp` included
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::Authentication(format!("Failed to create HMAC: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the url-encoded query of `params` plus `recvWindow`, `timestamp` and `signature`
pub fn signed_query(
    secret: &str,
    params: &[(&str, String)],
    recv_window_ms: u64,
    timestamp_ms: i64,
) -> Result<String> {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.append_pair("recvWindow", &recv_window_ms.to_string());
    serializer.append_pair("timestamp", &timestamp_ms.to_string());
    let query = serializer.finish();

    let signature = sign_query(secret, &query)?;
    Ok(format!("{}&signature={}", query, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_query_matches_reference_vector() {
        // Example from the Binance API documentation
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

        let signature = sign_query(secret, query).unwrap();
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_signed_query_appends_signature_last() {
        let query = signed_query(
            "secret",
            &[("symbol", "NEARUSDT".to_string())],
            5000,
            1_700_000_000_000,
        )
        .unwrap();

        assert!(query.starts_with("symbol=NEARUSDT&recvWindow=5000&timestamp=1700000000000&signature="));
        let signature = query.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
    }
}
