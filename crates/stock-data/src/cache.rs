//! TTL-bounded cache for quotes and history
//!
//! Each data kind has its own `TimedCache` with an independent lifespan.
//! Expiry is lazy: a stale entry is dropped when it is read.

use std::sync::Arc;
use std::time::Duration;

use cached::{Cached, TimedCache};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{DataKind, HistorySeries, MarketData, Quote, Symbol};

/// A cached value and when it was stored
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub symbol: Symbol,
    pub data: MarketData,
    pub inserted_at: DateTime<Utc>,
}

type Store = Arc<RwLock<TimedCache<Symbol, CacheEntry>>>;

/// Shared cache of market data keyed by symbol and kind
pub struct QuoteCache {
    quotes: Store,
    history: Store,
}

impl QuoteCache {
    pub fn new(quote_ttl: Duration, history_ttl: Duration) -> Self {
        Self {
            quotes: Arc::new(RwLock::new(TimedCache::with_lifespan(quote_ttl))),
            history: Arc::new(RwLock::new(TimedCache::with_lifespan(history_ttl))),
        }
    }

    fn store(&self, kind: DataKind) -> &Store {
        match kind {
            DataKind::Quote => &self.quotes,
            DataKind::History => &self.history,
        }
    }

    /// Get a live entry
    pub async fn get(&self, symbol: &Symbol, kind: DataKind) -> Option<CacheEntry> {
        let mut cache = self.store(kind).write().await;
        let entry = cache.cache_get(symbol).cloned();
        debug!(
            symbol = %symbol,
            kind = %kind,
            hit = entry.is_some(),
            "Cache lookup"
        );
        entry
    }

    pub async fn get_quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.get(symbol, DataKind::Quote)
            .await
            .and_then(|entry| entry.data.into_quote())
    }

    pub async fn get_history(&self, symbol: &Symbol) -> Option<HistorySeries> {
        self.get(symbol, DataKind::History)
            .await
            .and_then(|entry| entry.data.into_history())
    }

    /// Store a value under its own kind, replacing any previous entry
    pub async fn put(&self, symbol: Symbol, data: MarketData) {
        let kind = data.kind();
        let entry = CacheEntry {
            symbol: symbol.clone(),
            data,
            inserted_at: Utc::now(),
        };
        let mut cache = self.store(kind).write().await;
        let _ = cache.cache_set(symbol, entry);
    }

    pub async fn invalidate(&self, symbol: &Symbol, kind: DataKind) {
        let mut cache = self.store(kind).write().await;
        let _ = cache.cache_remove(symbol);
    }

    /// Clear both kinds
    pub async fn clear(&self) {
        self.quotes.write().await.cache_clear();
        self.history.write().await.cache_clear();
    }

    /// Number of stored entries of one kind, including expired entries not
    /// yet read
    pub async fn len(&self, kind: DataKind) -> usize {
        self.store(kind).read().await.cache_size()
    }

    pub async fn is_empty(&self) -> bool {
        self.len(DataKind::Quote).await == 0 && self.len(DataKind::History).await == 0
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(4 * 3600))
    }
}

impl Clone for QuoteCache {
    fn clone(&self) -> Self {
        Self {
            quotes: Arc::clone(&self.quotes),
            history: Arc::clone(&self.history),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderId;

    fn quote(code: &str, last: f64) -> Quote {
        Quote {
            symbol: Symbol::parse(code).unwrap(),
            name: None,
            last,
            prior_close: last,
            volume: 100,
            turnover: last * 100.0,
            timestamp: Utc::now(),
            provider: ProviderId::EASTMONEY,
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = QuoteCache::default();
        let q = quote("600519", 1700.0);
        cache.put(q.symbol.clone(), q.clone().into()).await;

        assert_eq!(cache.get_quote(&q.symbol).await, Some(q.clone()));
        // Stored under the quote kind only
        assert!(cache.get(&q.symbol, DataKind::History).await.is_none());
        assert_eq!(cache.len(DataKind::Quote).await, 1);
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let cache = QuoteCache::new(Duration::from_secs(1), Duration::from_secs(60));
        let q = quote("000001", 10.0);
        cache.put(q.symbol.clone(), q.clone().into()).await;
        assert!(cache.get_quote(&q.symbol).await.is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cache.get_quote(&q.symbol).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = QuoteCache::default();
        for code in ["600519", "000001", "AAPL"] {
            let q = quote(code, 10.0);
            cache.put(q.symbol.clone(), q.into()).await;
        }
        assert_eq!(cache.len(DataKind::Quote).await, 3);

        let symbol = Symbol::parse("AAPL").unwrap();
        cache.invalidate(&symbol, DataKind::Quote).await;
        assert!(cache.get_quote(&symbol).await.is_none());
        assert_eq!(cache.len(DataKind::Quote).await, 2);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
