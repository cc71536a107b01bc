//! DuckDuckGo instant-answer backend.
//!
//! Snippet-only: the API returns abstracts and related topics, never full
//! page content. The service throttles aggressive clients, so the dispatcher
//! pauses between requests to this backend.

use super::SearchProvider;
use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::types::{SearchResponse, SearchResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DDG_ENDPOINT: &str = "https://api.duckduckgo.com/";

pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
    max_results: usize,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("scrivener/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: DDG_ENDPOINT.to_string(),
            max_results: config.max_results,
        })
    }

    fn request_url(&self, query: &str) -> String {
        format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            self.endpoint,
            urlencoding::encode(query)
        )
    }

    /// Extract results from an instant-answer payload.
    fn parse_body(query: &str, body: &str, max_results: usize) -> Result<SearchResponse, SearchError> {
        let json: Value = serde_json::from_str(body).map_err(|e| SearchError::ResponseParse {
            query: query.to_string(),
            message: e.to_string(),
        })?;

        let mut results = Vec::new();

        let abstract_text = json["AbstractText"].as_str().unwrap_or_default();
        let abstract_url = json["AbstractURL"].as_str().unwrap_or_default();
        if !abstract_text.is_empty() && !abstract_url.is_empty() {
            let heading = json["Heading"].as_str().unwrap_or(query);
            results.push(SearchResult {
                title: heading.to_string(),
                url: abstract_url.to_string(),
                content: abstract_text.to_string(),
                raw_content: None,
                score: None,
            });
        }

        for key in ["Results", "RelatedTopics"] {
            if let Some(topics) = json[key].as_array() {
                collect_topics(topics, &mut results);
            }
        }

        results.truncate(max_results);
        Ok(SearchResponse {
            query: query.to_string(),
            results,
        })
    }
}

/// Flatten topic entries, descending into grouped `Topics` arrays.
fn collect_topics(topics: &[Value], out: &mut Vec<SearchResult>) {
    for topic in topics {
        if let Some(nested) = topic["Topics"].as_array() {
            collect_topics(nested, out);
            continue;
        }
        let (Some(text), Some(url)) = (topic["Text"].as_str(), topic["FirstURL"].as_str()) else {
            continue;
        };
        if text.is_empty() || url.is_empty() {
            continue;
        }
        let title = text.split(" - ").next().unwrap_or(text);
        out.push(SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            content: text.to_string(),
            raw_content: None,
            score: None,
        });
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, SearchError> {
        let url = self.request_url(query);
        debug!(query, "DuckDuckGo search");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                query: query.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 202 {
            return Err(SearchError::RateLimited {
                query: query.to_string(),
            });
        }
        let body = response.text().await.map_err(|e| SearchError::Request {
            query: query.to_string(),
            message: format!("failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(SearchError::Request {
                query: query.to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), body),
            });
        }
        Self::parse_body(query, &body, self.max_results)
    }

    fn throttled(&self) -> bool {
        true
    }
}
