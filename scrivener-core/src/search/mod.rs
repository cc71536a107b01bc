//! Web search backends and the throttled query dispatcher.
//!
//! Provides the `SearchProvider` trait with implementations for:
//! - Tavily (full-content results, optional raw page text)
//! - DuckDuckGo instant answers (snippet-only, rate limited)
//!
//! Use `create_search_provider()` to instantiate the configured backend and
//! wrap it in a `SearchDispatcher`, which fans a query batch out under a
//! bounded-concurrency gate and degrades failed queries to empty results.

pub mod duckduckgo;
pub mod tavily;

use crate::config::{SearchApi, SearchConfig};
use crate::error::{ConfigError, SearchError};
use crate::sources::{SourceFormat, deduplicate_and_format};
use crate::types::{SearchQuery, SearchResponse, SearchResult};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub use duckduckgo::DuckDuckGoSearch;
pub use tavily::TavilySearch;

/// A single search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Backend identifier for logs.
    fn name(&self) -> &str;

    /// Run one query and return its ranked results.
    async fn search(&self, query: &str) -> Result<SearchResponse, SearchError>;

    /// Whether results may carry raw page content.
    fn returns_raw_content(&self) -> bool {
        false
    }

    /// Whether the backend throttles clients, requiring a pause between requests.
    fn throttled(&self) -> bool {
        false
    }
}

/// Instantiate the configured search backend.
///
/// Fails fast with a configuration error for an unknown backend or a missing
/// API key; there is no fallback to another backend.
pub fn create_search_provider(
    config: &SearchConfig,
) -> Result<Arc<dyn SearchProvider>, ConfigError> {
    match config.backend()? {
        SearchApi::Tavily => {
            let api_key = std::env::var(&config.tavily_api_key_env).map_err(|_| {
                ConfigError::EnvVarMissing {
                    var: config.tavily_api_key_env.clone(),
                }
            })?;
            Ok(Arc::new(TavilySearch::new(config, api_key)?))
        }
        SearchApi::DuckDuckGo => Ok(Arc::new(DuckDuckGoSearch::new(config)?)),
    }
}

/// Fans queries out over a provider with a hard cap on in-flight requests.
///
/// One dispatcher is shared by every section of a run, so the cap holds across
/// all concurrent research loops.
pub struct SearchDispatcher {
    provider: Arc<dyn SearchProvider>,
    permits: Arc<Semaphore>,
    request_delay: Duration,
    format: SourceFormat,
}

impl SearchDispatcher {
    pub fn new(provider: Arc<dyn SearchProvider>, config: &SearchConfig) -> Self {
        let format = if provider.returns_raw_content() && config.include_raw_content {
            SourceFormat::WithRawContent {
                max_tokens_per_source: config.max_tokens_per_source,
            }
        } else {
            SourceFormat::SnippetOnly
        };
        Self {
            provider,
            permits: Arc::new(Semaphore::new(config.max_concurrent_searches.max(1))),
            request_delay: Duration::from_millis(config.request_delay_ms),
            format,
        }
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Run every query concurrently and gather the responses in query order.
    ///
    /// A failing query is logged and contributes an empty response.
    pub async fn search(&self, queries: &[SearchQuery]) -> Vec<SearchResponse> {
        let tasks = queries.iter().map(|q| self.search_one(q.as_str()));
        join_all(tasks).await
    }

    /// Search, deduplicate by URL and format into a context string.
    pub async fn search_and_format(&self, queries: &[SearchQuery]) -> String {
        let responses = self.search(queries).await;
        deduplicate_and_format(&responses, self.format)
    }

    async fn search_one(&self, query: &str) -> SearchResponse {
        let Ok(_permit) = self.permits.acquire().await else {
            warn!(query, "Search gate closed; skipping query");
            return SearchResponse::empty(query);
        };
        debug!(backend = self.provider.name(), query, "Dispatching search");

        let response = match self.provider.search(query).await {
            Ok(response) => response,
            Err(e) => {
                warn!(backend = self.provider.name(), query, error = %e, "Search failed; using empty results");
                SearchResponse::empty(query)
            }
        };

        if self.provider.throttled() && !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        response
    }
}

/// In-memory search backend for tests and offline runs.
///
/// Returns canned results per query (or a generated default), records every
/// query it receives, and tracks the peak number of concurrent requests.
pub struct MockSearchProvider {
    results: HashMap<String, Vec<SearchResult>>,
    failing: Vec<String>,
    latency: Duration,
    raw_content: bool,
    throttled: bool,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            failing: Vec::new(),
            latency: Duration::ZERO,
            raw_content: false,
            throttled: false,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Return these results for an exact query string.
    pub fn with_results(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        self.results.insert(query.to_string(), results);
        self
    }

    /// Make this query fail with a request error.
    pub fn with_failure(mut self, query: &str) -> Self {
        self.failing.push(query.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_raw_content(mut self, raw_content: bool) -> Self {
        self.raw_content = raw_content;
        self
    }

    pub fn with_throttling(mut self, throttled: bool) -> Self {
        self.throttled = throttled;
        self
    }

    /// Every query received so far, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn default_results(query: &str) -> Vec<SearchResult> {
        let slug: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        vec![SearchResult {
            title: format!("Result for {query}"),
            url: format!("https://example.com/{slug}"),
            content: format!("Snippet about {query}"),
            raw_content: Some(format!("Full text about {query}")),
            score: Some(0.5),
        }]
    }
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, SearchError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.iter().any(|f| f == query) {
            return Err(SearchError::Request {
                query: query.to_string(),
                message: "mock failure".into(),
            });
        }
        let results = self
            .results
            .get(query)
            .cloned()
            .unwrap_or_else(|| Self::default_results(query));
        Ok(SearchResponse {
            query: query.to_string(),
            results,
        })
    }

    fn returns_raw_content(&self) -> bool {
        self.raw_content
    }

    fn throttled(&self) -> bool {
        self.throttled
    }
}
