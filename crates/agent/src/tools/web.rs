//! Web search over the DuckDuckGo instant-answer API

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use termagent_config::WebSearchConfig;

use super::{Tool, ToolContext, ToolError, ToolResult};

pub const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";
const NO_RESULTS: &str = "No results found.";

#[derive(Debug, Default, Deserialize)]
struct SearchHit {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(rename = "Results", default)]
    results: Vec<SearchHit>,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<Value>,
}

/// Web search tool
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(max_results: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results: max_results.max(1),
        }
    }

    pub fn from_config(config: &WebSearchConfig) -> Self {
        Self::new(config.max_results)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn search(&self, query: &str) -> ToolResult<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json")])
            .timeout(Duration::from_secs(15))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Execution(format!(
                "search request failed with status code: {}",
                status.as_u16()
            )));
        }
        // DuckDuckGo answers with `application/x-javascript`, so decode by hand.
        let body = response.text().await?;
        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| ToolError::Execution(format!("failed to decode search response: {}", e)))?;
        Ok(format_results(&parsed, self.max_results))
    }
}

/// Direct results first, then related topics, as a markdown list.
fn format_results(response: &SearchResponse, limit: usize) -> String {
    let related = response
        .related_topics
        .iter()
        .filter_map(|topic| serde_json::from_value::<SearchHit>(topic.clone()).ok());

    let lines: Vec<String> = response
        .results
        .iter()
        .map(|hit| (hit.heading.clone(), hit.text.clone(), hit.first_url.clone()))
        .chain(related.map(|hit| (hit.heading, hit.text, hit.first_url)))
        .filter(|(_, _, url)| !url.is_empty())
        .take(limit)
        .map(|(heading, text, url)| {
            let title = if heading.is_empty() { text } else { heading };
            format!("- [{}]({})", title, url)
        })
        .collect();

    if lines.is_empty() {
        NO_RESULTS.to_string()
    } else {
        lines.join("\n")
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "websearch"
    }

    fn description(&self) -> &str {
        "Search the web using DuckDuckGo. Returns a markdown list of the first few results."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query to use for the web search." }
            },
            "required": ["query"]
        })
    }

    async fn run(&self, args: Map<String, Value>, ctx: &ToolContext) -> ToolResult<String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query is empty".to_string()));
        }
        debug!(query = %query, "web search");

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            result = self.search(query) => result,
        }
    }
}
