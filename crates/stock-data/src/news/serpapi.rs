//! SerpAPI over the Baidu engine, better for Chinese stock news

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{NewsItem, NewsProvider, search_status_error};
use crate::adapters::{Credential, transport_error};
use crate::error::FetchError;

const SEARCH_URL: &str = "https://serpapi.com/search.json";
const ENGINE: &str = "baidu";

#[derive(Debug, Clone)]
pub struct SerpApiSearch {
    client: Client,
}

impl SerpApiSearch {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

/// SerpAPI reports most failures in an `error` field, sometimes with 200
fn api_error(message: &str) -> Option<FetchError> {
    let lower = message.to_lowercase();
    if lower.contains("hasn't returned any results") {
        None
    } else if lower.contains("api key") || lower.contains("run out of searches") {
        Some(FetchError::RateLimited(message.to_string()))
    } else {
        Some(FetchError::ProtocolError(format!("serpapi: {message}")))
    }
}

fn parse_results(payload: &Value, max_results: usize) -> Result<Vec<NewsItem>, FetchError> {
    if let Some(message) = payload["error"].as_str() {
        return match api_error(message) {
            Some(err) => Err(err),
            None => Ok(Vec::new()),
        };
    }

    let organic: &[Value] = payload["organic_results"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();

    Ok(organic
        .iter()
        .take(max_results)
        .map(|hit| {
            NewsItem::new(
                hit["title"].as_str().unwrap_or_default(),
                hit["snippet"].as_str().unwrap_or_default(),
                hit["link"].as_str().unwrap_or_default(),
                hit["source"].as_str(),
                hit["date"].as_str(),
            )
        })
        .collect())
}

#[async_trait]
impl NewsProvider for SerpApiSearch {
    fn name(&self) -> &'static str {
        "serpapi"
    }

    #[instrument(skip(self, credential), fields(provider = "serpapi"))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        credential: &Credential,
    ) -> Result<Vec<NewsItem>, FetchError> {
        let api_key = credential.token().ok_or(FetchError::Unsupported)?;

        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[("engine", ENGINE), ("q", query), ("api_key", api_key)])
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(_) if !status.is_success() => return Err(search_status_error(status, "")),
            Err(e) => return Err(FetchError::ProtocolError(format!("invalid JSON: {e}"))),
        };
        if !status.is_success() && payload["error"].as_str().is_none() {
            return Err(search_status_error(status, ""));
        }

        let items = parse_results(&payload, max_results)?;
        debug!(results = items.len(), "SerpAPI search complete");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_organic_results() {
        let payload = json!({
            "search_metadata": {"status": "Success"},
            "organic_results": [
                {"position": 1, "title": "宁德时代 最新消息", "link": "https://www.eastmoney.com/a", "snippet": "订单增长", "date": "2024-06-03"},
                {"position": 2, "title": "second", "link": "https://news.qq.com/b", "snippet": "s", "source": "腾讯新闻"}
            ]
        });
        let items = parse_results(&payload, 5).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source, "eastmoney.com");
        assert_eq!(items[0].published.as_deref(), Some("2024-06-03"));
        assert_eq!(items[1].source, "腾讯新闻");
    }

    #[test]
    fn test_key_errors_rotate() {
        let invalid = json!({"error": "Invalid API key. Your API key should be here: https://serpapi.com/manage-api-key"});
        assert!(matches!(parse_results(&invalid, 5), Err(FetchError::RateLimited(_))));

        let spent = json!({"error": "Your account has run out of searches."});
        assert!(matches!(parse_results(&spent, 5), Err(FetchError::RateLimited(_))));
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let payload = json!({"error": "Baidu hasn't returned any results for this query."});
        assert_eq!(parse_results(&payload, 5), Ok(Vec::new()));
    }
}
