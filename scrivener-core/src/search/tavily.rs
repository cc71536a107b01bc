//! Tavily search backend.
//!
//! Calls `POST https://api.tavily.com/search` and maps each hit to a
//! `SearchResult`, including raw page content when requested.

use super::SearchProvider;
use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::types::{SearchResponse, SearchResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

pub struct TavilySearch {
    client: Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl From<TavilyHit> for SearchResult {
    fn from(hit: TavilyHit) -> Self {
        SearchResult {
            title: hit.title,
            url: hit.url,
            content: hit.content,
            raw_content: hit.raw_content,
            score: hit.score,
        }
    }
}

impl TavilySearch {
    pub fn new(config: &SearchConfig, api_key: String) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: TAVILY_ENDPOINT.to_string(),
            api_key,
            max_results: config.max_results,
            include_raw_content: config.include_raw_content,
        })
    }

    /// Point the backend at a different endpoint (local proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, query: &str) -> serde_json::Value {
        json!({
            "query": query,
            "max_results": self.max_results,
            "include_raw_content": self.include_raw_content,
            "topic": "general",
        })
    }

    fn parse_body(query: &str, body: &str) -> Result<SearchResponse, SearchError> {
        let parsed: TavilyResponse =
            serde_json::from_str(body).map_err(|e| SearchError::ResponseParse {
                query: query.to_string(),
                message: e.to_string(),
            })?;
        Ok(SearchResponse {
            query: query.to_string(),
            results: parsed.results.into_iter().map(SearchResult::from).collect(),
        })
    }

    fn map_status(query: &str, status: reqwest::StatusCode, body: &str) -> SearchError {
        match status.as_u16() {
            401 | 403 => SearchError::AuthFailed {
                backend: "tavily".into(),
            },
            429 => SearchError::RateLimited {
                query: query.to_string(),
            },
            code => SearchError::Request {
                query: query.to_string(),
                message: format!("HTTP {code}: {body}"),
            },
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, SearchError> {
        debug!(query, max_results = self.max_results, "Tavily search");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(query))
            .send()
            .await
            .map_err(|e| SearchError::Request {
                query: query.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SearchError::Request {
            query: query.to_string(),
            message: format!("failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(Self::map_status(query, status, &body));
        }
        Self::parse_body(query, &body)
    }

    fn returns_raw_content(&self) -> bool {
        true
    }
}
