//! Tavily search API, limited to the last week of news

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{NewsItem, NewsProvider, search_status_error};
use crate::adapters::{Credential, transport_error};
use crate::error::FetchError;

const SEARCH_URL: &str = "https://api.tavily.com/search";
const LOOKBACK_DAYS: u32 = 7;

#[derive(Debug, Clone)]
pub struct TavilySearch {
    client: Client,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    topic: &'a str,
    search_depth: &'a str,
    max_results: usize,
    days: u32,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    published_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    error: Option<String>,
}

impl TavilySearch {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn into_items(response: SearchResponse, max_results: usize) -> Vec<NewsItem> {
    response
        .results
        .into_iter()
        .take(max_results)
        .map(|hit| {
            NewsItem::new(
                &hit.title,
                &hit.content,
                &hit.url,
                None,
                hit.published_date.as_deref(),
            )
        })
        .collect()
}

#[async_trait]
impl NewsProvider for TavilySearch {
    fn name(&self) -> &'static str {
        "tavily"
    }

    #[instrument(skip(self, credential), fields(provider = "tavily"))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        credential: &Credential,
    ) -> Result<Vec<NewsItem>, FetchError> {
        let api_key = credential.token().ok_or(FetchError::Unsupported)?;
        let request = SearchRequest {
            api_key,
            query,
            topic: "news",
            search_depth: "advanced",
            max_results: max_results.max(1),
            days: LOOKBACK_DAYS,
            include_answer: false,
            include_raw_content: false,
        };

        let response = self
            .client
            .post(SEARCH_URL)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.detail)
                .and_then(|d| d.error)
                .unwrap_or(body);
            return Err(search_status_error(status, &message));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| FetchError::ProtocolError(format!("invalid JSON: {e}")))?;
        let items = into_items(parsed, max_results);
        debug!(results = items.len(), "Tavily search complete");
        Ok(items)
    }
}
