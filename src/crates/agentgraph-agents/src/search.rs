//! Web search for the researcher
//!
//! [`WebSearch`] is the seam; [`TavilySearch`] calls the Tavily search API
//! with `TAVILY_API_KEY`. [`WebSearchTool`] exposes any backend to a model
//! as the `web_search` tool, formatting results as numbered sources.

use crate::error::{AgentError, Result};
use crate::tools::{object_schema, str_arg, string_param, Tool, ToolContext};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const TAVILY_URL: &str = "https://api.tavily.com/search";
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Tavily search API client
#[derive(Clone)]
pub struct TavilySearch {
    client: Client,
    api_key: String,
    url: String,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AgentError::Search(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: TAVILY_URL.to_string(),
        })
    }

    /// Client keyed from the `key_env` variable
    pub fn from_env(key_env: &str) -> Result<Self> {
        let key = std::env::var(key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::Search(format!("{} is not set", key_env)))?;
        Self::new(key)
    }

    /// Point at another endpoint, e.g. a local mock
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    #[tracing::instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": query,
                "max_results": max_results,
                "search_depth": "basic",
                "topic": "general",
            }))
            .send()
            .await
            .map_err(|e| AgentError::Search(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Search(format!("Tavily returned {}: {}", status, body)));
        }
        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Search(format!("invalid Tavily response: {}", e)))?;
        tracing::debug!(results = parsed.results.len(), "search complete");
        Ok(parsed.results)
    }
}

/// Numbered, deduplicated source list for a model
pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No valid search results found. Please try different search queries.".to_string();
    }
    let mut seen = std::collections::HashSet::new();
    let mut out = String::from("Search results: \n\n");
    let mut n = 0;
    for result in results {
        if !seen.insert(result.url.as_str()) {
            continue;
        }
        n += 1;
        out.push_str(&format!(
            "\n\n--- SOURCE {}: {} ---\nURL: {}\n\nSUMMARY:\n{}\n\n{}\n",
            n,
            result.title,
            result.url,
            result.content,
            "-".repeat(80)
        ));
    }
    out
}

/// `web_search` tool over a [`WebSearch`] backend
#[derive(Clone)]
pub struct WebSearchTool {
    backend: Arc<dyn WebSearch>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn WebSearch>) -> Self {
        Self {
            backend,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "A search engine optimized for comprehensive, accurate, and trusted results. \
Useful for when you need to answer questions about current events."
    }

    fn parameters(&self) -> Value {
        object_schema([("query", string_param("A single, specific search query"))])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let query = str_arg(&args, "query")?;
        let results = self.backend.search(query, self.max_results).await?;
        Ok(format_results(&results))
    }
}
