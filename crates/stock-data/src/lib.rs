//! Market data acquisition for the watchlist engine
//!
//! Quotes and daily history come from an ordered list of providers. Each
//! provider slot carries its own circuit breakers and credential pool, and
//! successful answers land in a shared TTL cache so repeated requests within
//! a run never hit the network twice.
//!
//! - [`domain`]: symbols, quotes, bars and history series
//! - [`adapters`]: the provider contract and the Eastmoney, Tushare and Yahoo adapters
//! - [`circuit_breaker`]: per provider and data kind failure tracking
//! - [`cache`]: TTL-bounded quote and history cache
//! - [`manager`]: priority failover, prefetch and health snapshots
//! - [`news`]: web news search with key rotation and a price fallback

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod manager;
pub mod news;

pub use adapters::{Credential, ProviderAdapter};
pub use cache::{CacheEntry, QuoteCache};
pub use circuit_breaker::{
    Admission, CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitState, ProviderHealth,
};
pub use config::{DataConfig, DataConfigBuilder, NewsConfig};
pub use domain::{
    Bar, DataKind, Exchange, HistoryRange, HistorySeries, Market, MarketData, ProviderId, Quote,
    Symbol,
};
pub use error::{DataError, FetchError, HistoryError, NewsError, SymbolError};
pub use manager::{DataSourceManager, PrefetchReport, ProviderSlot, SlotHealth};
pub use news::{NewsDigest, NewsItem, NewsProvider, NewsService, NewsSlot};
