//! Web news search for the analysis prompt
//!
//! Search providers are tried in configured order, each behind its own key
//! pool: a rejected or exhausted key rotates to the next key, any other
//! failure moves on to the next provider. When every market data source has
//! failed for a symbol, [`NewsService::search_price_fallback`] runs a few
//! price-oriented queries and merges what they find as a last resort.

mod bocha;
mod serpapi;
mod service;
mod tavily;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;

pub use bocha::BochaSearch;
pub use serpapi::SerpApiSearch;
pub use service::{NewsService, NewsSlot};
pub use tavily::TavilySearch;

use crate::adapters::{Credential, status_error};
use crate::error::FetchError;

/// Longest snippet kept from a search hit, in characters
const MAX_SNIPPET_CHARS: usize = 500;

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsItem {
    pub title: String,
    pub snippet: String,
    pub url: String,
    /// Site name, or the URL's host when the provider gives none
    pub source: String,
    /// Publication date as the provider formats it
    pub published: Option<String>,
}

impl NewsItem {
    pub(crate) fn new(
        title: &str,
        snippet: &str,
        url: &str,
        source: Option<&str>,
        published: Option<&str>,
    ) -> Self {
        let source = source
            .filter(|s| !s.trim().is_empty())
            .map_or_else(|| host_of(url), str::to_string);
        Self {
            title: title.trim().to_string(),
            snippet: clip(snippet.trim(), MAX_SNIPPET_CHARS),
            url: url.to_string(),
            source,
            published: published
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        }
    }
}

/// Results of one search, or of several merged searches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsDigest {
    pub query: String,
    /// Provider name, comma-separated when results were merged
    pub provider: String,
    pub items: Vec<NewsItem>,
}

impl NewsDigest {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Uniform contract for a web search API.
///
/// Like the market data adapters, an implementation makes exactly one
/// request per call; key rotation and provider failover belong to
/// [`NewsService`].
#[async_trait]
pub trait NewsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        credential: &Credential,
    ) -> Result<Vec<NewsItem>, FetchError>;
}

/// Map a failed search response to the fetch taxonomy.
///
/// Search APIs answer 401 for a bad key and 403 or 432/433 for a spent
/// balance; both are specific to the key and rotate like a rate limit.
pub(crate) fn search_status_error(status: StatusCode, message: &str) -> FetchError {
    match status.as_u16() {
        401 => FetchError::RateLimited(format!("API key rejected: {message}")),
        403 | 432 | 433 => FetchError::RateLimited(format!("quota exhausted: {message}")),
        400 => FetchError::ProtocolError(format!("bad search request: {message}")),
        _ => match status_error(status, message) {
            FetchError::NotFound(_) => FetchError::ProtocolError(format!("HTTP {status}")),
            other => other,
        },
    }
}

/// Host part of a URL, empty when it does not parse
fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_default()
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
