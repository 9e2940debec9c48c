//! Provider adapters
//!
//! Every adapter performs exactly one network call per invocation and never
//! retries; retry, rotation and failover belong to the manager.

mod eastmoney;
mod tushare;
mod yahoo;

use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;

pub use eastmoney::EastmoneyAdapter;
pub use tushare::TushareAdapter;
pub use yahoo::YahooAdapter;

use crate::domain::{HistoryRange, HistorySeries, ProviderId, Quote, Symbol};
use crate::error::FetchError;

/// Credential handed to an adapter for one call
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Free endpoints
    Anonymous,
    /// API token
    Token(String),
}

impl Credential {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Token(token) => Some(token),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

/// Uniform capability contract for a market data provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Whether this provider can serve the symbol at all
    fn supports(&self, symbol: &Symbol) -> bool;

    async fn fetch_quote(&self, symbol: &Symbol, credential: &Credential)
    -> Result<Quote, FetchError>;

    async fn fetch_history(
        &self,
        symbol: &Symbol,
        range: HistoryRange,
        credential: &Credential,
    ) -> Result<HistorySeries, FetchError>;

    fn supports_batch_quotes(&self) -> bool {
        false
    }

    /// Quotes for several symbols in one call. Symbols the provider has no
    /// data for are simply missing from the result.
    async fn fetch_quotes(
        &self,
        _symbols: &[Symbol],
        _credential: &Credential,
    ) -> Result<Vec<Quote>, FetchError> {
        Err(FetchError::Unsupported)
    }
}

/// Map a transport error to the fetch taxonomy
pub(crate) fn transport_error(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = err.status() {
        status_error(status, "")
    } else {
        FetchError::ProtocolError(err.to_string())
    }
}

/// Map a non-success HTTP status to the fetch taxonomy
pub(crate) fn status_error(status: StatusCode, context: &str) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited(format!("HTTP {status}")),
        StatusCode::NOT_FOUND => FetchError::NotFound(context.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchError::Timeout,
        _ => FetchError::ProtocolError(format!("HTTP {status}")),
    }
}

/// Reject quotes that fail the basic shape check
pub(crate) fn checked(quote: Quote) -> Result<Quote, FetchError> {
    if quote.is_sane() {
        Ok(quote)
    } else {
        Err(FetchError::ProtocolError(format!(
            "implausible quote for {}: last={} prior_close={}",
            quote.symbol, quote.last, quote.prior_close
        )))
    }
}

/// Numeric field that may be encoded as a number, a numeric string, or a
/// placeholder such as `"-"` for suspended symbols
pub(crate) fn json_f64(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credential_debug_is_redacted() {
        let debug = format!("{:?}", Credential::Token("secret-token".to_string()));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            FetchError::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "600519"),
            FetchError::NotFound(s) if s == "600519"
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            FetchError::ProtocolError(_)
        ));
    }

    #[test]
    fn test_json_f64_placeholders() {
        assert_eq!(json_f64(&json!(12.5)), Some(12.5));
        assert_eq!(json_f64(&json!("12.5")), Some(12.5));
        assert_eq!(json_f64(&json!("-")), None);
        assert_eq!(json_f64(&json!(null)), None);
    }
}
