//! Web search tool backed by a pluggable search provider

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use crate::Result;
use crate::error::Error;
use super::Tool;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Results rendered into the tool output
const MAX_RENDERED_RESULTS: usize = 3;

/// Response from a search provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Synthesized answer, when the provider produced one
    #[serde(default)]
    pub answer: Option<String>,

    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// A single ranked search result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default, alias = "content")]
    pub snippet: Option<String>,
}

/// Search provider trait - anything that turns a query into results
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResponse>;
}

/// Tavily search API client
#[derive(Clone)]
pub struct TavilyClient {
    api_key: String,
    max_results: usize,
    client: Client,
}

impl TavilyClient {
    pub fn new(api_key: &str, max_results: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            api_key: api_key.to_string(),
            max_results,
            client,
        }
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, query: &str) -> Result<SearchResponse> {
        if self.api_key.is_empty() {
            return Err(Error::Config(
                "search API key is not configured (set TAVILY_API_KEY)".to_string(),
            ));
        }

        let response = self.client
            .post(TAVILY_API_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": query,
                "include_answer": "advanced",
                "max_results": self.max_results
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("search provider returned {}: {}", status, error_text)));
        }

        Ok(response.json().await?)
    }
}

/// Pull a search query out of tool arguments.
///
/// Strings are used as they are. Objects contribute their `query` or `q`
/// field, or their JSON text when neither exists. Anything else has no query.
pub fn extract_query(params: &Value) -> Option<String> {
    match params {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            // a present field wins even when blank
            let field = ["query", "q"].iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str));
            Some(field.map(str::to_string).unwrap_or_else(|| params.to_string()))
        }
        _ => None,
    }
}

/// Render a provider response as the text handed back to the model
pub fn format_results(response: &SearchResponse) -> String {
    let summary = response.answer.as_deref()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or("no summary available");

    let mut out = format!("Summary: {}\n\n", summary);

    if response.results.is_empty() {
        out.push_str("No results found.");
        return out;
    }

    out.push_str("Sources:\n");
    for (i, hit) in response.results.iter().take(MAX_RENDERED_RESULTS).enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, hit.title.as_deref().unwrap_or("Untitled")));
        out.push_str(&format!("   {}\n", hit.url.as_deref().unwrap_or("(no url)")));
        if let Some(snippet) = hit.snippet.as_deref().filter(|s| !s.is_empty()) {
            out.push_str(&format!("   {}\n", snippet));
        }
        out.push('\n');
    }

    out
}

/// Web search tool.
///
/// Never fails: bad input and provider errors come back as a
/// `Search failed: ...` string so the model can react to them.
pub struct WebSearchTool {
    provider: Box<dyn SearchProvider>,
}

impl WebSearchTool {
    pub const NAME: &'static str = "search";

    pub fn new(provider: impl SearchProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str { Self::NAME }
    fn description(&self) -> &str { "Search the internet for real-time information" }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = match extract_query(&params) {
            Some(q) if !q.trim().is_empty() => q,
            _ => return Ok("Search failed: please provide a non-empty search query".to_string()),
        };

        debug!("Searching the web for: {}", query);

        match self.provider.search(query.trim()).await {
            Ok(response) => Ok(format_results(&response)),
            Err(e) => {
                warn!("Search provider error: {}", e);
                Ok(format!("Search failed: {}", e))
            }
        }
    }
}
