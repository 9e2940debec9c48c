//! Priority failover across provider slots
//!
//! `resolve` serves from the cache when it can, then walks the slots in
//! priority order. Slots that cannot serve the symbol or whose breaker is
//! open are skipped; the first provider that answers wins and its answer is
//! cached.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use stock_utils::{CredentialPool, RateLimitedCaller, RetryClass, RetryClassify, RetryPolicy};
use tracing::{debug, info, warn};

use crate::adapters::{Credential, EastmoneyAdapter, ProviderAdapter, TushareAdapter, YahooAdapter};
use crate::cache::QuoteCache;
use crate::circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitState, ProviderHealth,
};
use crate::config::DataConfig;
use crate::domain::{DataKind, HistoryRange, HistorySeries, MarketData, ProviderId, Quote, Symbol};
use crate::error::{DataError, FetchError};

/// One provider with its breakers and credential-aware caller
pub struct ProviderSlot {
    adapter: Arc<dyn ProviderAdapter>,
    quote_breaker: CircuitBreaker,
    history_breaker: CircuitBreaker,
    caller: RateLimitedCaller<Credential>,
}

impl ProviderSlot {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        pool: Arc<CredentialPool<Credential>>,
        policy: RetryPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let id = adapter.id();
        Self {
            quote_breaker: CircuitBreaker::new(format!("{id}/quote"), breaker),
            history_breaker: CircuitBreaker::new(format!("{id}/history"), breaker),
            caller: RateLimitedCaller::new(pool, policy),
            adapter,
        }
    }

    /// Slot for a provider that needs no credential
    pub fn anonymous(
        adapter: Arc<dyn ProviderAdapter>,
        policy: RetryPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let pool = Arc::new(CredentialPool::single(Credential::Anonymous));
        Self::new(adapter, pool, policy, breaker)
    }

    /// Slot rotating through API tokens
    pub fn with_tokens(
        adapter: Arc<dyn ProviderAdapter>,
        tokens: Vec<String>,
        policy: RetryPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Result<Self, DataError> {
        let credentials = tokens.into_iter().map(Credential::Token).collect();
        let pool = CredentialPool::new(credentials)
            .map_err(|e| DataError::Setup(format!("{}: {e}", adapter.id())))?;
        Ok(Self::new(adapter, Arc::new(pool), policy, breaker))
    }

    pub fn id(&self) -> ProviderId {
        self.adapter.id()
    }

    pub fn breaker(&self, kind: DataKind) -> &CircuitBreaker {
        match kind {
            DataKind::Quote => &self.quote_breaker,
            DataKind::History => &self.history_breaker,
        }
    }

    fn health(&self) -> SlotHealth {
        SlotHealth {
            provider: self.id(),
            quote: self.quote_breaker.snapshot(),
            history: self.history_breaker.snapshot(),
            credentials: self.caller.pool().len(),
            rotations: self.caller.pool().rotations(),
        }
    }
}

/// Diagnostic snapshot of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHealth {
    pub provider: ProviderId,
    pub quote: ProviderHealth,
    pub history: ProviderHealth,
    pub credentials: usize,
    pub rotations: u64,
}

/// Result of a watchlist prefetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Already cached
    pub hits: usize,
    /// Fetched and cached by this call
    pub fetched: usize,
    /// Not available from any provider
    pub failed: Vec<Symbol>,
}

/// Fetch error as seen by the caller inside one slot.
///
/// Only a rate limit moves on to the slot's next credential. Anything else
/// ends the slot call after one real attempt, so each breaker record stands
/// for one request and a slow provider costs at most one timeout.
struct SlotError(FetchError);

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl RetryClassify for SlotError {
    fn retry_class(&self) -> RetryClass {
        match self.0 {
            FetchError::RateLimited(_) => RetryClass::Rotate,
            _ => RetryClass::Abort,
        }
    }
}

/// Breaker outcome for a failed provider call
fn outcome_for(err: &FetchError) -> CallOutcome {
    if matches!(err, FetchError::ProviderUnavailable) {
        CallOutcome::Skipped
    } else if err.is_healthy_response() {
        CallOutcome::Success
    } else {
        CallOutcome::Failure
    }
}

/// Ordered provider slots sharing one cache
pub struct DataSourceManager {
    slots: Vec<ProviderSlot>,
    cache: QuoteCache,
    request_timeout: Duration,
    history_days: u32,
}

impl DataSourceManager {
    /// Create a manager over the given slots, highest priority first
    pub fn new(slots: Vec<ProviderSlot>) -> Result<Self, DataError> {
        if slots.is_empty() {
            return Err(DataError::NoProviders);
        }
        let defaults = DataConfig::default();
        Ok(Self {
            slots,
            cache: QuoteCache::new(defaults.quote_ttl, defaults.history_ttl),
            request_timeout: defaults.request_timeout,
            history_days: defaults.history_days,
        })
    }

    /// Build the built-in providers in configured priority order.
    ///
    /// Tushare is left out when no token is configured.
    pub fn from_config(config: &DataConfig) -> Result<Self, DataError> {
        let setup = |e: reqwest::Error| DataError::Setup(e.to_string());
        let mut slots = Vec::with_capacity(config.priority.len());

        for id in &config.priority {
            let slot = match *id {
                ProviderId::EASTMONEY => {
                    let adapter = EastmoneyAdapter::new(config.request_timeout).map_err(setup)?;
                    ProviderSlot::anonymous(
                        Arc::new(adapter),
                        config.provider_retry.clone(),
                        config.breaker,
                    )
                }
                ProviderId::TUSHARE if config.tushare_tokens.is_empty() => {
                    debug!("No Tushare token configured, provider disabled");
                    continue;
                }
                ProviderId::TUSHARE => {
                    let adapter = TushareAdapter::new(
                        config.request_timeout,
                        config.tushare_calls_per_minute,
                    )
                    .map_err(setup)?;
                    ProviderSlot::with_tokens(
                        Arc::new(adapter),
                        config.tushare_tokens.clone(),
                        config.provider_retry.clone(),
                        config.breaker,
                    )?
                }
                ProviderId::YAHOO => {
                    let adapter = YahooAdapter::new()
                        .map_err(|e| DataError::Setup(format!("yahoo: {e}")))?;
                    ProviderSlot::anonymous(
                        Arc::new(adapter),
                        config.provider_retry.clone(),
                        config.breaker,
                    )
                }
                other => {
                    warn!(provider = %other, "Unknown provider in priority list, ignoring");
                    continue;
                }
            };
            slots.push(slot);
        }

        info!(
            providers = ?slots.iter().map(ProviderSlot::id).collect::<Vec<_>>(),
            "Data sources configured"
        );

        Ok(Self::new(slots)?
            .with_cache(QuoteCache::new(config.quote_ttl, config.history_ttl))
            .with_request_timeout(config.request_timeout)
            .with_history_days(config.history_days))
    }

    pub fn with_cache(mut self, cache: QuoteCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_history_days(mut self, days: u32) -> Self {
        self.history_days = days.max(1);
        self
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    /// Resolve one symbol and kind to data from the first working provider
    pub async fn resolve(&self, symbol: &Symbol, kind: DataKind) -> Result<MarketData, DataError> {
        if let Some(entry) = self.cache.get(symbol, kind).await {
            return Ok(entry.data);
        }

        let mut last = None;
        let mut attempted = 0usize;
        let mut not_found = 0usize;

        for slot in &self.slots {
            if !slot.adapter.supports(symbol) {
                continue;
            }

            let breaker = slot.breaker(kind);
            let Some(admission) = breaker.admit() else {
                debug!(provider = %slot.id(), symbol = %symbol, kind = %kind, "Circuit open, skipping provider");
                last.get_or_insert(FetchError::ProviderUnavailable);
                continue;
            };

            match self.call_slot(slot, symbol, kind).await {
                Ok(data) => {
                    breaker.settle(admission, CallOutcome::Success);
                    info!(provider = %slot.id(), symbol = %symbol, kind = %kind, "Resolved market data");
                    self.cache.put(symbol.clone(), data.clone()).await;
                    return Ok(data);
                }
                Err(err) => {
                    breaker.settle(admission, outcome_for(&err));
                    if !matches!(err, FetchError::ProviderUnavailable) {
                        attempted += 1;
                    }
                    if matches!(err, FetchError::NotFound(_)) {
                        not_found += 1;
                    }
                    warn!(
                        provider = %slot.id(),
                        symbol = %symbol,
                        kind = %kind,
                        error = %err,
                        "Provider failed, trying next"
                    );
                    last = Some(err);
                }
            }
        }

        if attempted > 0 && attempted == not_found {
            return Err(DataError::NoData {
                symbol: symbol.to_string(),
                kind,
            });
        }
        Err(DataError::AllSourcesExhausted { kind, last })
    }

    pub async fn quote(&self, symbol: &Symbol) -> Result<Quote, DataError> {
        self.resolve(symbol, DataKind::Quote)
            .await?
            .into_quote()
            .ok_or(DataError::AllSourcesExhausted {
                kind: DataKind::Quote,
                last: None,
            })
    }

    pub async fn history(&self, symbol: &Symbol) -> Result<HistorySeries, DataError> {
        self.resolve(symbol, DataKind::History)
            .await?
            .into_history()
            .ok_or(DataError::AllSourcesExhausted {
                kind: DataKind::History,
                last: None,
            })
    }

    async fn call_slot(
        &self,
        slot: &ProviderSlot,
        symbol: &Symbol,
        kind: DataKind,
    ) -> Result<MarketData, FetchError> {
        let adapter = &slot.adapter;
        let breaker = slot.breaker(kind);
        let timeout = self.request_timeout;
        let range = HistoryRange::last_days(self.history_days);
        let operation = format!("{}/{kind}", adapter.id());

        slot.caller
            .call(&operation, |credential| async move {
                // Another task may have opened the circuit between rotations
                if breaker.state() == CircuitState::Open {
                    return Err(SlotError(FetchError::ProviderUnavailable));
                }
                let fetch = async {
                    match kind {
                        DataKind::Quote => adapter
                            .fetch_quote(symbol, &credential)
                            .await
                            .map(MarketData::from),
                        DataKind::History => adapter
                            .fetch_history(symbol, range, &credential)
                            .await
                            .map(MarketData::from),
                    }
                };
                match tokio::time::timeout(timeout, fetch).await {
                    Ok(result) => result.map_err(SlotError),
                    Err(_) => Err(SlotError(FetchError::Timeout)),
                }
            })
            .await
            .map_err(|SlotError(err)| err)
    }

    async fn call_batch(
        &self,
        slot: &ProviderSlot,
        symbols: &[Symbol],
    ) -> Result<Vec<Quote>, FetchError> {
        let adapter = &slot.adapter;
        let timeout = self.request_timeout;
        let operation = format!("{}/batch", adapter.id());

        slot.caller
            .call(&operation, |credential| async move {
                match tokio::time::timeout(timeout, adapter.fetch_quotes(symbols, &credential)).await
                {
                    Ok(result) => result.map_err(SlotError),
                    Err(_) => Err(SlotError(FetchError::Timeout)),
                }
            })
            .await
            .map_err(|SlotError(err)| err)
    }

    /// Warm the cache for a watchlist.
    ///
    /// Only cache misses are fetched: batch-capable providers first, then
    /// single resolves for whatever is still missing.
    pub async fn prefetch(&self, symbols: &[Symbol], kind: DataKind) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        let mut seen = HashSet::new();
        let mut missing = Vec::new();

        for symbol in symbols {
            if !seen.insert(symbol) {
                continue;
            }
            if self.cache.get(symbol, kind).await.is_some() {
                report.hits += 1;
            } else {
                missing.push(symbol.clone());
            }
        }

        if kind == DataKind::Quote {
            for slot in self.slots.iter().filter(|s| s.adapter.supports_batch_quotes()) {
                let batch: Vec<Symbol> = missing
                    .iter()
                    .filter(|s| slot.adapter.supports(s))
                    .cloned()
                    .collect();
                if batch.is_empty() {
                    continue;
                }
                let Some(admission) = slot.quote_breaker.admit() else {
                    continue;
                };

                match self.call_batch(slot, &batch).await {
                    Ok(quotes) => {
                        slot.quote_breaker.settle(admission, CallOutcome::Success);
                        let mut fetched = HashSet::new();
                        for quote in quotes {
                            if batch.contains(&quote.symbol) && fetched.insert(quote.symbol.clone()) {
                                self.cache.put(quote.symbol.clone(), quote.into()).await;
                            }
                        }
                        debug!(provider = %slot.id(), requested = batch.len(), fetched = fetched.len(), "Batch prefetch");
                        report.fetched += fetched.len();
                        missing.retain(|s| !fetched.contains(s));
                    }
                    Err(err) => {
                        slot.quote_breaker.settle(admission, outcome_for(&err));
                        warn!(provider = %slot.id(), error = %err, "Batch prefetch failed");
                    }
                }
            }
        }

        let results = join_all(missing.iter().map(|symbol| self.resolve(symbol, kind))).await;
        for (symbol, result) in missing.into_iter().zip(results) {
            match result {
                Ok(_) => report.fetched += 1,
                Err(_) => report.failed.push(symbol),
            }
        }

        info!(
            kind = %kind,
            hits = report.hits,
            fetched = report.fetched,
            failed = report.failed.len(),
            "Prefetch complete"
        );
        report
    }

    /// Breaker and credential state of every slot, in priority order
    pub fn health(&self) -> Vec<SlotHealth> {
        self.slots.iter().map(ProviderSlot::health).collect()
    }
}
