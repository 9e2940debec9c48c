//! Bocha web search (Chinese-language, with AI summaries)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{NewsItem, NewsProvider, search_status_error};
use crate::adapters::{Credential, transport_error};
use crate::error::FetchError;

const SEARCH_URL: &str = "https://api.bocha.cn/v1/web-search";

/// The API caps `count` at 50
const MAX_COUNT: usize = 50;

#[derive(Debug, Clone)]
pub struct BochaSearch {
    client: Client,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    freshness: &'a str,
    summary: bool,
    count: usize,
}

impl BochaSearch {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn parse_results(payload: &Value, max_results: usize) -> Result<Vec<NewsItem>, FetchError> {
    let code = payload["code"].as_i64().unwrap_or_default();
    if code != 200 {
        let msg = payload["msg"].as_str().unwrap_or("unknown error");
        return Err(FetchError::ProtocolError(format!("bocha error {code}: {msg}")));
    }

    let pages: &[Value] = payload["data"]["webPages"]["value"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();

    Ok(pages
        .iter()
        .take(max_results)
        .map(|page| {
            // AI summary when present, plain snippet otherwise
            let snippet = page["summary"]
                .as_str()
                .filter(|s| !s.is_empty())
                .or_else(|| page["snippet"].as_str())
                .unwrap_or_default();
            NewsItem::new(
                page["name"].as_str().unwrap_or_default(),
                snippet,
                page["url"].as_str().unwrap_or_default(),
                page["siteName"].as_str(),
                page["datePublished"].as_str(),
            )
        })
        .collect())
}

#[async_trait]
impl NewsProvider for BochaSearch {
    fn name(&self) -> &'static str {
        "bocha"
    }

    #[instrument(skip(self, credential), fields(provider = "bocha"))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        credential: &Credential,
    ) -> Result<Vec<NewsItem>, FetchError> {
        let key = credential.token().ok_or(FetchError::Unsupported)?;
        let request = SearchRequest {
            query,
            freshness: "oneMonth",
            summary: true,
            count: max_results.clamp(1, MAX_COUNT),
        };

        let response = self
            .client
            .post(SEARCH_URL)
            .bearer_auth(key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or(body);
            return Err(search_status_error(status, &message));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| FetchError::ProtocolError(format!("invalid JSON: {e}")))?;
        let items = parse_results(&payload, max_results)?;
        debug!(results = items.len(), "Bocha search complete");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Value {
        json!({
            "code": 200,
            "msg": null,
            "data": {
                "webPages": {
                    "value": [
                        {
                            "name": "贵州茅台发布年度业绩预告",
                            "url": "https://www.cls.cn/detail/1",
                            "snippet": "short snippet",
                            "summary": "AI summary of the announcement",
                            "siteName": "财联社",
                            "datePublished": "2024-06-03T08:00:00+08:00"
                        },
                        {
                            "name": "白酒板块走强",
                            "url": "https://finance.sina.com.cn/a/2",
                            "snippet": "plain snippet"
                        },
                        {
                            "name": "third",
                            "url": "https://example.com/3",
                            "snippet": "x"
                        }
                    ]
                }
            }
        })
    }

    #[test]
    fn test_parse_prefers_summary_and_site_name() {
        let items = parse_results(&fixture(), 5).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].snippet, "AI summary of the announcement");
        assert_eq!(items[0].source, "财联社");
        assert_eq!(items[0].published.as_deref(), Some("2024-06-03T08:00:00+08:00"));
        assert_eq!(items[1].snippet, "plain snippet");
        assert_eq!(items[1].source, "finance.sina.com.cn");
    }

    #[test]
    fn test_parse_respects_max_results() {
        assert_eq!(parse_results(&fixture(), 2).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_api_error_code() {
        let payload = json!({"code": 500, "msg": "internal"});
        assert!(matches!(
            parse_results(&payload, 5),
            Err(FetchError::ProtocolError(msg)) if msg.contains("internal")
        ));
    }

    #[test]
    fn test_parse_no_pages_is_empty() {
        let payload = json!({"code": 200, "data": {}});
        assert!(parse_results(&payload, 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_credential_unsupported() {
        let search = BochaSearch::new(Duration::from_secs(5)).unwrap();
        let result = search.search("q", 5, &Credential::Anonymous).await;
        assert_eq!(result, Err(FetchError::Unsupported));
    }
}
