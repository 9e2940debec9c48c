//! Run configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use stock_utils::{ConfigError, RetryPolicy, env_parse};

/// How results reach the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One delivery with every result, in watchlist order, after the run
    #[default]
    Batch,
    /// One delivery per result, as each task completes
    Streaming,
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" | "single" => Ok(Self::Batch),
            "stream" | "streaming" => Ok(Self::Streaming),
            other => Err(format!("unknown delivery mode '{other}' (expected batch or stream)")),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch => f.write_str("batch"),
            Self::Streaming => f.write_str("stream"),
        }
    }
}

/// Configuration for one scheduler run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Number of concurrent workers
    pub concurrency: usize,

    /// Minimum gap between two task starts
    pub spacing: Duration,

    pub delivery: DeliveryMode,

    /// Wall-clock budget; tasks not started by then are cancelled
    pub deadline: Option<Duration>,

    /// Retry policy for model calls
    pub ai_retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            spacing: Duration::ZERO,
            delivery: DeliveryMode::Batch,
            deadline: None,
            ai_retry: RetryPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Defaults overridden by `MAX_WORKERS`, `ANALYSIS_DELAY_MS`,
    /// `DELIVERY_MODE` and `RUN_DEADLINE_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        if let Some(workers) = env_parse::<usize>("MAX_WORKERS")? {
            builder = builder.concurrency(workers);
        }
        if let Some(delay) = env_parse::<u64>("ANALYSIS_DELAY_MS")? {
            builder = builder.spacing(Duration::from_millis(delay));
        }
        if let Some(mode) = env_parse::<DeliveryMode>("DELIVERY_MODE")? {
            builder = builder.delivery(mode);
        }
        if let Some(secs) = env_parse::<u64>("RUN_DEADLINE_SECS")? {
            builder = builder.deadline(Duration::from_secs(secs));
        }
        builder.build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid(
                "deadline must be greater than 0".to_string(),
            ));
        }
        if self.ai_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ai_retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for RunConfig
#[derive(Debug, Default)]
pub struct RunConfigBuilder {
    concurrency: Option<usize>,
    spacing: Option<Duration>,
    delivery: Option<DeliveryMode>,
    deadline: Option<Duration>,
    ai_retry: Option<RetryPolicy>,
}

impl RunConfigBuilder {
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    pub fn spacing(mut self, spacing: Duration) -> Self {
        self.spacing = Some(spacing);
        self
    }

    pub fn delivery(mut self, mode: DeliveryMode) -> Self {
        self.delivery = Some(mode);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn ai_retry(mut self, policy: RetryPolicy) -> Self {
        self.ai_retry = Some(policy);
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let defaults = RunConfig::default();

        let config = RunConfig {
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            spacing: self.spacing.unwrap_or(defaults.spacing),
            delivery: self.delivery.unwrap_or(defaults.delivery),
            deadline: self.deadline.or(defaults.deadline),
            ai_retry: self.ai_retry.unwrap_or(defaults.ai_retry),
        };

        config.validate()?;
        Ok(config)
    }
}
