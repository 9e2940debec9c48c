//! Error types for market data acquisition

use chrono::NaiveDate;
use stock_utils::{RetryClass, RetryClassify};
use thiserror::Error;

use crate::domain::DataKind;

/// A watchlist entry that is not a recognizable symbol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("empty symbol")]
    Empty,

    #[error("unrecognized symbol: {0}")]
    Unrecognized(String),
}

/// A history payload that violates the series invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history contains no bars")]
    Empty,

    #[error("duplicate bar for {0}")]
    DuplicateDate(NaiveDate),

    #[error("bar for {0} has inconsistent prices")]
    InvalidBar(NaiveDate),
}

/// Failure of a single provider call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The call did not complete within the request timeout
    #[error("request timed out")]
    Timeout,

    /// The provider or the local quota refused the request
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider answered but has nothing for this symbol
    #[error("no data for {0}")]
    NotFound(String),

    /// Transport failure or a response of unexpected shape
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The provider cannot serve this request at all
    #[error("operation not supported by provider")]
    Unsupported,

    /// The provider's circuit is open
    #[error("provider unavailable")]
    ProviderUnavailable,
}

impl FetchError {
    /// Whether the provider answered normally.
    ///
    /// `NotFound` and `Unsupported` say nothing about provider health and
    /// must not push its breaker towards opening.
    pub fn is_healthy_response(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Unsupported)
    }
}

impl From<HistoryError> for FetchError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::Empty => Self::NotFound("empty history".to_string()),
            other => Self::ProtocolError(other.to_string()),
        }
    }
}

impl RetryClassify for FetchError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited(_) => RetryClass::Rotate,
            Self::Timeout | Self::ProtocolError(_) => RetryClass::Backoff,
            Self::NotFound(_) | Self::Unsupported | Self::ProviderUnavailable => RetryClass::Abort,
        }
    }
}

/// Failure of a resolve across all providers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// Every provider was skipped or failed
    #[error("all sources exhausted for {kind}{}", last_error_suffix(.last.as_ref()))]
    AllSourcesExhausted {
        kind: DataKind,
        last: Option<FetchError>,
    },

    /// Every provider that answered had nothing for this symbol
    #[error("no {kind} data for {symbol}")]
    NoData { symbol: String, kind: DataKind },

    /// A manager needs at least one provider
    #[error("no data providers configured")]
    NoProviders,

    /// A provider could not be constructed or configured
    #[error("provider setup failed: {0}")]
    Setup(String),
}

/// Failure of a news search across all search providers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NewsError {
    #[error("no search provider configured")]
    NotConfigured,

    /// Providers answered, but nothing matched
    #[error("no search results for {query}")]
    NoResults { query: String },

    /// Every search provider failed
    #[error("all search providers failed{}", last_error_suffix(.last.as_ref()))]
    Exhausted { last: Option<FetchError> },
}

fn last_error_suffix(last: Option<&FetchError>) -> String {
    last.map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}
