//! Configuration for market data acquisition

use std::time::Duration;

use stock_utils::{ConfigError, RetryPolicy, env_list, env_parse};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::domain::ProviderId;

/// Configuration for the data source manager and its providers
#[derive(Clone)]
pub struct DataConfig {
    /// Provider order, highest priority first
    pub priority: Vec<ProviderId>,

    /// Cache TTL for quotes
    pub quote_ttl: Duration,

    /// Cache TTL for daily history
    pub history_ttl: Duration,

    /// Breaker thresholds, shared by every provider and data kind
    pub breaker: CircuitBreakerConfig,

    /// Calendar days of history to request
    pub history_days: u32,

    /// Per-call timeout enforced by the manager
    pub request_timeout: Duration,

    /// Rounds of credential rotation inside one provider slot.
    ///
    /// Only rate limits are retried in a slot; timeouts and protocol errors
    /// fail the slot at once and the manager moves to the next provider.
    pub provider_retry: RetryPolicy,

    /// Tushare tokens; the provider is left out when empty
    pub tushare_tokens: Vec<String>,

    /// Client-side Tushare quota
    pub tushare_calls_per_minute: u32,
}

impl std::fmt::Debug for DataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataConfig")
            .field("priority", &self.priority)
            .field("quote_ttl", &self.quote_ttl)
            .field("history_ttl", &self.history_ttl)
            .field("breaker", &self.breaker)
            .field("history_days", &self.history_days)
            .field("request_timeout", &self.request_timeout)
            .field("provider_retry", &self.provider_retry)
            .field("tushare_tokens", &self.tushare_tokens.len())
            .field("tushare_calls_per_minute", &self.tushare_calls_per_minute)
            .finish()
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            priority: vec![ProviderId::EASTMONEY, ProviderId::TUSHARE, ProviderId::YAHOO],
            quote_ttl: Duration::from_secs(30),
            history_ttl: Duration::from_secs(4 * 3600),
            breaker: CircuitBreakerConfig::default(),
            history_days: 90,
            request_timeout: Duration::from_secs(15),
            provider_retry: RetryPolicy::no_retry(),
            tushare_tokens: Vec::new(),
            tushare_calls_per_minute: 80,
        }
    }
}

impl DataConfig {
    /// Create a new configuration builder
    pub fn builder() -> DataConfigBuilder {
        DataConfigBuilder::default()
    }

    /// Defaults overridden by `TUSHARE_TOKEN` (comma-separated) and
    /// `HISTORY_DAYS`. A configured token moves Tushare to the front.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder().tushare_tokens(env_list("TUSHARE_TOKEN"));
        if let Some(days) = env_parse::<u32>("HISTORY_DAYS")? {
            builder = builder.history_days(days);
        }
        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.priority.is_empty() {
            return Err(ConfigError::Invalid(
                "provider priority list must not be empty".to_string(),
            ));
        }
        if self.quote_ttl.is_zero() || self.history_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "cache TTLs must be greater than 0".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.history_days == 0 {
            return Err(ConfigError::Invalid(
                "history_days must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be greater than 0".to_string(),
            ));
        }
        if self.tushare_calls_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "tushare_calls_per_minute must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for DataConfig
#[derive(Default)]
pub struct DataConfigBuilder {
    priority: Option<Vec<ProviderId>>,
    quote_ttl: Option<Duration>,
    history_ttl: Option<Duration>,
    breaker: Option<CircuitBreakerConfig>,
    history_days: Option<u32>,
    request_timeout: Option<Duration>,
    provider_retry: Option<RetryPolicy>,
    tushare_tokens: Vec<String>,
    tushare_calls_per_minute: Option<u32>,
}

impl DataConfigBuilder {
    pub fn priority(mut self, priority: Vec<ProviderId>) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn quote_ttl(mut self, ttl: Duration) -> Self {
        self.quote_ttl = Some(ttl);
        self
    }

    pub fn history_ttl(mut self, ttl: Duration) -> Self {
        self.history_ttl = Some(ttl);
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn history_days(mut self, days: u32) -> Self {
        self.history_days = Some(days);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn provider_retry(mut self, policy: RetryPolicy) -> Self {
        self.provider_retry = Some(policy);
        self
    }

    pub fn tushare_tokens(mut self, tokens: Vec<String>) -> Self {
        self.tushare_tokens = tokens;
        self
    }

    pub fn tushare_calls_per_minute(mut self, calls: u32) -> Self {
        self.tushare_calls_per_minute = Some(calls);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<DataConfig, ConfigError> {
        let defaults = DataConfig::default();

        let priority = match self.priority {
            Some(priority) => priority,
            None if !self.tushare_tokens.is_empty() => tushare_first(defaults.priority),
            None => defaults.priority,
        };

        let config = DataConfig {
            priority,
            quote_ttl: self.quote_ttl.unwrap_or(defaults.quote_ttl),
            history_ttl: self.history_ttl.unwrap_or(defaults.history_ttl),
            breaker: self.breaker.unwrap_or(defaults.breaker),
            history_days: self.history_days.unwrap_or(defaults.history_days),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            provider_retry: self.provider_retry.unwrap_or(defaults.provider_retry),
            tushare_tokens: self.tushare_tokens,
            tushare_calls_per_minute: self
                .tushare_calls_per_minute
                .unwrap_or(defaults.tushare_calls_per_minute),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration for the news search service
#[derive(Clone)]
pub struct NewsConfig {
    /// Bocha keys, tried first
    pub bocha_keys: Vec<String>,

    /// Tavily keys
    pub tavily_keys: Vec<String>,

    /// SerpAPI keys, tried last
    pub serpapi_keys: Vec<String>,

    /// Hits kept per news search
    pub max_results: usize,

    /// Queries issued by the price fallback search
    pub fallback_queries: usize,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for NewsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsConfig")
            .field("bocha_keys", &self.bocha_keys.len())
            .field("tavily_keys", &self.tavily_keys.len())
            .field("serpapi_keys", &self.serpapi_keys.len())
            .field("max_results", &self.max_results)
            .field("fallback_queries", &self.fallback_queries)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            bocha_keys: Vec::new(),
            tavily_keys: Vec::new(),
            serpapi_keys: Vec::new(),
            max_results: 5,
            fallback_queries: 3,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl NewsConfig {
    /// Keys from `BOCHA_API_KEYS`, `TAVILY_API_KEYS` and `SERPAPI_API_KEYS`
    /// (comma-separated), plus `NEWS_MAX_RESULTS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            bocha_keys: env_list("BOCHA_API_KEYS"),
            tavily_keys: env_list("TAVILY_API_KEYS"),
            serpapi_keys: env_list("SERPAPI_API_KEYS"),
            ..Self::default()
        };
        if let Some(max) = env_parse::<usize>("NEWS_MAX_RESULTS")? {
            config.max_results = max;
        }
        config.validate()?;
        Ok(config)
    }

    /// Whether any search provider has a key
    pub fn is_configured(&self) -> bool {
        !(self.bocha_keys.is_empty() && self.tavily_keys.is_empty() && self.serpapi_keys.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_results == 0 {
            return Err(ConfigError::Invalid(
                "news max_results must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "news request_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Paid data with a token beats the free sources
fn tushare_first(mut priority: Vec<ProviderId>) -> Vec<ProviderId> {
    priority.retain(|id| *id != ProviderId::TUSHARE);
    priority.insert(0, ProviderId::TUSHARE);
    priority
}
