//! Wiring environment configuration into engine inputs

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use stock_data::{NewsConfig, NewsService};
use stock_engine::{ModelEndpoint, Watchlist};
use stock_llm::providers::{OpenAIConfig, OpenAIProvider};
use stock_utils::{ConfigError, env_list, env_string};
use tracing::info;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Model access read from `OPENAI_*` variables
pub struct AiSettings {
    pub keys: Vec<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub fallback_model: Option<String>,
}

impl std::fmt::Debug for AiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiSettings")
            .field("keys", &self.keys.len())
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("fallback_model", &self.fallback_model)
            .finish()
    }
}

impl AiSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let keys = env_list("OPENAI_API_KEY");
        if keys.is_empty() {
            return Err(ConfigError::Missing("OPENAI_API_KEY".to_string()));
        }
        Ok(Self {
            keys,
            base_url: env_string("OPENAI_BASE_URL"),
            model: env_string("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fallback_model: env_string("OPENAI_FALLBACK_MODEL"),
        })
    }

    /// Every key on the primary model, then every key on the fallback model
    pub fn endpoints(&self) -> Result<Vec<ModelEndpoint>> {
        let providers = self
            .keys
            .iter()
            .map(|key| {
                let mut config = OpenAIConfig::new(key.as_str());
                if let Some(base) = &self.base_url {
                    config = config.with_api_base(base.as_str());
                }
                OpenAIProvider::with_config(config).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to create model provider")?;

        let models = std::iter::once(&self.model)
            .chain(self.fallback_model.iter().filter(|m| **m != self.model));

        let endpoints = models
            .flat_map(|model| {
                providers.iter().enumerate().map(move |(i, provider)| {
                    ModelEndpoint::new(format!("key{}/{model}", i + 1), provider.clone(), model)
                })
            })
            .collect();
        Ok(endpoints)
    }
}

/// Parse watchlist entries. Entries that are not stock codes stay in the
/// watchlist as rejects so the run summary reports them as failed.
pub fn load_watchlist(entries: &[String]) -> Result<Watchlist> {
    let watchlist = Watchlist::parse(entries);
    if watchlist.is_empty() {
        bail!("Watchlist is empty; set STOCK_LIST or pass --stocks");
    }
    Ok(watchlist)
}

/// Web search, when any search key is configured
pub fn news_service() -> Result<Option<Arc<NewsService>>> {
    let config = NewsConfig::from_env().context("Invalid news search configuration")?;
    let service = NewsService::from_config(&config).context("Failed to set up news search")?;
    if service.is_none() {
        info!("No search API keys, analyzing without news");
    }
    Ok(service.map(Arc::new))
}
