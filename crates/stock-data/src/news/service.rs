//! Ordered failover across search providers

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use stock_utils::{CredentialPool, RateLimitedCaller, RetryPolicy};
use tracing::{debug, info, warn};

use super::{BochaSearch, NewsDigest, NewsItem, NewsProvider, SerpApiSearch, TavilySearch};
use crate::adapters::Credential;
use crate::config::NewsConfig;
use crate::domain::Symbol;
use crate::error::{DataError, FetchError, NewsError};

/// Query templates for the price fallback, most useful first
const PRICE_QUERIES: [&str; 5] = [
    "{name} 股票 今日 股价",
    "{name} {code} 最新 行情 走势",
    "{name} 股票 分析 走势图",
    "{name} K线 技术分析",
    "{name} {code} 涨跌 成交量",
];

/// Hits requested per price fallback query
const FALLBACK_HITS_PER_QUERY: usize = 3;

/// One search provider with its key pool
pub struct NewsSlot {
    provider: Arc<dyn NewsProvider>,
    caller: RateLimitedCaller<Credential>,
}

impl NewsSlot {
    /// Keys rotate on rejection or quota errors; other failures are not
    /// retried and hand over to the next provider.
    pub fn new(provider: Arc<dyn NewsProvider>, keys: Vec<String>) -> Result<Self, DataError> {
        let credentials = keys.into_iter().map(Credential::Token).collect();
        let pool = CredentialPool::new(credentials)
            .map_err(|e| DataError::Setup(format!("{}: {e}", provider.name())))?;
        Ok(Self {
            provider,
            caller: RateLimitedCaller::new(Arc::new(pool), RetryPolicy::no_retry()),
        })
    }

    pub fn name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn rotations(&self) -> u64 {
        self.caller.pool().rotations()
    }
}

/// Stock news and fallback market information from web search
pub struct NewsService {
    slots: Vec<NewsSlot>,
    max_results: usize,
    fallback_queries: usize,
    request_timeout: Duration,
    query_spacing: Duration,
}

impl NewsService {
    /// Create a service over the given slots, highest priority first
    pub fn new(slots: Vec<NewsSlot>) -> Self {
        let defaults = NewsConfig::default();
        Self {
            slots,
            max_results: defaults.max_results,
            fallback_queries: defaults.fallback_queries,
            request_timeout: defaults.request_timeout,
            query_spacing: Duration::from_millis(500),
        }
    }

    /// Bocha, Tavily, then SerpAPI, each only when it has keys.
    ///
    /// Returns `None` when no search key is configured at all.
    pub fn from_config(config: &NewsConfig) -> Result<Option<Self>, DataError> {
        if !config.is_configured() {
            debug!("No search API keys configured, news search disabled");
            return Ok(None);
        }
        let setup = |e: reqwest::Error| DataError::Setup(e.to_string());
        let timeout = config.request_timeout;
        let mut slots = Vec::new();

        if !config.bocha_keys.is_empty() {
            let provider = BochaSearch::new(timeout).map_err(setup)?;
            slots.push(NewsSlot::new(Arc::new(provider), config.bocha_keys.clone())?);
        }
        if !config.tavily_keys.is_empty() {
            let provider = TavilySearch::new(timeout).map_err(setup)?;
            slots.push(NewsSlot::new(Arc::new(provider), config.tavily_keys.clone())?);
        }
        if !config.serpapi_keys.is_empty() {
            let provider = SerpApiSearch::new(timeout).map_err(setup)?;
            slots.push(NewsSlot::new(Arc::new(provider), config.serpapi_keys.clone())?);
        }

        info!(
            providers = ?slots.iter().map(NewsSlot::name).collect::<Vec<_>>(),
            "News search configured"
        );
        Ok(Some(
            Self::new(slots)
                .with_max_results(config.max_results)
                .with_fallback_queries(config.fallback_queries)
                .with_request_timeout(timeout),
        ))
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn with_fallback_queries(mut self, queries: usize) -> Self {
        self.fallback_queries = queries.clamp(1, PRICE_QUERIES.len());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Pause between the price fallback's queries
    pub fn with_query_spacing(mut self, spacing: Duration) -> Self {
        self.query_spacing = spacing;
        self
    }

    pub fn is_available(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn slots(&self) -> &[NewsSlot] {
        &self.slots
    }

    /// Latest news for a stock from the first provider with results
    pub async fn search_stock_news(
        &self,
        symbol: &Symbol,
        name: &str,
    ) -> Result<NewsDigest, NewsError> {
        let query = fill("{name} {code} 股票 最新消息", symbol, name);
        info!(symbol = %symbol, "Searching stock news");
        self.search(&query, self.max_results).await
    }

    /// Price and trend information from web search, for symbols no market
    /// data provider could serve.
    ///
    /// Runs several query templates, takes the first provider with results
    /// for each, and merges the hits with duplicate URLs removed.
    pub async fn search_price_fallback(
        &self,
        symbol: &Symbol,
        name: &str,
    ) -> Result<NewsDigest, NewsError> {
        if self.slots.is_empty() {
            return Err(NewsError::NotConfigured);
        }
        info!(symbol = %symbol, "Market data unavailable, searching the web for price information");

        let mut items: Vec<NewsItem> = Vec::new();
        let mut seen = HashSet::new();
        let mut providers: Vec<String> = Vec::new();
        let mut exhausted = None;

        for (i, template) in PRICE_QUERIES.iter().take(self.fallback_queries).enumerate() {
            if i > 0 && !self.query_spacing.is_zero() {
                tokio::time::sleep(self.query_spacing).await;
            }
            let query = fill(template, symbol, name);
            match self.search(&query, FALLBACK_HITS_PER_QUERY).await {
                Ok(digest) => {
                    for item in digest.items {
                        if item.url.is_empty() || seen.insert(item.url.clone()) {
                            items.push(item);
                        }
                    }
                    if !providers.contains(&digest.provider) {
                        providers.push(digest.provider);
                    }
                }
                Err(err) => {
                    debug!(query = %query, error = %err, "Fallback query found nothing");
                    if matches!(err, NewsError::Exhausted { .. }) {
                        exhausted = Some(err);
                    }
                }
            }
        }

        let query = format!("{name}({}) 股价走势", symbol.code());
        if items.is_empty() {
            warn!(symbol = %symbol, "Web search found no price information");
            return Err(exhausted.unwrap_or(NewsError::NoResults { query }));
        }
        items.truncate(self.max_results);
        Ok(NewsDigest {
            query,
            provider: providers.join(", "),
            items,
        })
    }

    /// Run one query, failing over across providers until one has results
    pub async fn search(&self, query: &str, max_results: usize) -> Result<NewsDigest, NewsError> {
        if self.slots.is_empty() {
            return Err(NewsError::NotConfigured);
        }

        let mut last = None;
        let mut answered = false;
        for slot in &self.slots {
            match self.search_slot(slot, query, max_results).await {
                Ok(items) if !items.is_empty() => {
                    debug!(provider = slot.name(), results = items.len(), "Search succeeded");
                    return Ok(NewsDigest {
                        query: query.to_string(),
                        provider: slot.name().to_string(),
                        items,
                    });
                }
                Ok(_) => {
                    debug!(provider = slot.name(), "No search results, trying next provider");
                    answered = true;
                }
                Err(err) => {
                    warn!(provider = slot.name(), error = %err, "Search failed, trying next provider");
                    last = Some(err);
                }
            }
        }

        if answered {
            Err(NewsError::NoResults {
                query: query.to_string(),
            })
        } else {
            Err(NewsError::Exhausted { last })
        }
    }

    async fn search_slot(
        &self,
        slot: &NewsSlot,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<NewsItem>, FetchError> {
        let provider = &slot.provider;
        let timeout = self.request_timeout;
        slot.caller
            .call(provider.name(), |credential| async move {
                tokio::time::timeout(timeout, provider.search(query, max_results, &credential))
                    .await
                    .map_err(|_| FetchError::Timeout)?
            })
            .await
    }
}

/// Fill a query template. A name equal to the code is used only once.
fn fill(template: &str, symbol: &Symbol, name: &str) -> String {
    let code = symbol.code();
    let query = template.replace("{name}", name);
    let query = if name == code {
        query.replacen(" {code}", "", 1)
    } else {
        query
    };
    query.replace("{code}", code)
}
