//! Web search toolkit backed by DuckDuckGo's HTML interface.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AttacheError, Result};
use crate::tool::{Tool, ToolRegistry};

use super::required_str;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Clone)]
pub struct WebSearchConfig {
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            timeout_secs: 10,
        }
    }
}

pub fn web_search_toolkit(config: WebSearchConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(WebSearchTool {
        config: config.clone(),
    });
    registry.register(NewsSearchTool { config });
    registry
}

struct WebSearchTool {
    config: WebSearchConfig,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Expects {\"query\": string, \"max_results\": number (optional)}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(query_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let query = required_str(&input, "query", "web_search")?;
        let max_results = max_results(&input, self.config.max_results);
        let hits = run_search(query, max_results, self.config.timeout_secs).await?;
        Ok(json!({ "query": query, "results": hits }))
    }
}

struct NewsSearchTool {
    config: WebSearchConfig,
}

#[async_trait]
impl Tool for NewsSearchTool {
    fn name(&self) -> &str {
        "news_search"
    }

    fn description(&self) -> &str {
        "Search recent news. Expects {\"query\": string, \"max_results\": number (optional)}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(query_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let query = required_str(&input, "query", "news_search")?;
        let max_results = max_results(&input, self.config.max_results);
        let hits = run_search(&format!("{query} news"), max_results, self.config.timeout_secs).await?;
        Ok(json!({ "query": query, "results": hits }))
    }
}

fn query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string" },
            "max_results": { "type": "number" }
        },
        "required": ["query"]
    })
}

fn max_results(input: &Value, fallback: usize) -> usize {
    input
        .get("max_results")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(fallback)
}

async fn run_search(query: &str, max_results: usize, timeout_secs: u64) -> Result<Vec<SearchHit>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent("Mozilla/5.0 (compatible; AttacheBot/1.0)")
        .build()
        .map_err(|err| AttacheError::ToolExecution {
            name: "web_search".into(),
            source: Box::new(err),
        })?;

    let url = format!(
        "https://html.duckduckgo.com/html/?q={}",
        urlencoding::encode(query)
    );

    let html = client
        .get(&url)
        .send()
        .await
        .map_err(|err| AttacheError::ToolExecution {
            name: "web_search".into(),
            source: Box::new(err),
        })?
        .text()
        .await
        .map_err(|err| AttacheError::ToolExecution {
            name: "web_search".into(),
            source: Box::new(err),
        })?;

    Ok(parse_result_page(&html, max_results))
}

/// Extract results from the DuckDuckGo HTML page without a full DOM parser.
/// Each hit is an anchor with class `result__a`; the snippet, when present,
/// follows under class `result__snippet`.
fn parse_result_page(html: &str, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    for chunk in html.split("class=\"result__a\"").skip(1) {
        if hits.len() >= max_results {
            break;
        }

        let url = chunk
            .split("href=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or_default();

        let title = chunk
            .split_once('>')
            .and_then(|(_, rest)| rest.split("</a>").next())
            .map(strip_tags)
            .unwrap_or_default();

        let snippet = chunk
            .split("result__snippet")
            .nth(1)
            .and_then(|rest| rest.split_once('>'))
            .and_then(|(_, rest)| rest.split("</a>").next())
            .map(strip_tags)
            .unwrap_or_default();

        if url.starts_with("http") && !title.is_empty() {
            hits.push(SearchHit {
                title: decode_entities(&title),
                url: url.to_string(),
                snippet: decode_entities(&snippet),
            });
        }
    }

    hits
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = concat!(
        "<div class=\"result\">",
        "<a class=\"result__a\" href=\"https://example.com/one\">First &amp; Foremost</a>",
        "<a class=\"result__snippet\" href=\"#\">A <b>bold</b> snippet</a>",
        "</div>",
        "<div class=\"result\">",
        "<a class=\"result__a\" href=\"https://example.com/two\">Second</a>",
        "</div>",
    );

    #[test]
    fn toolkit_registers_both_tools() {
        let registry = web_search_toolkit(WebSearchConfig::default());
        assert_eq!(registry.names(), vec!["web_search", "news_search"]);
    }

    #[test]
    fn parses_titles_urls_and_snippets() {
        let hits = parse_result_page(SAMPLE_PAGE, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "First & Foremost");
        assert_eq!(hits[0].url, "https://example.com/one");
        assert_eq!(hits[0].snippet, "A bold snippet");
        assert_eq!(hits[1].snippet, "");
    }

    #[test]
    fn honors_the_result_cap() {
        let hits = parse_result_page(SAMPLE_PAGE, 1);
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn missing_query_is_an_input_error() {
        let registry = web_search_toolkit(WebSearchConfig::default());
        let err = registry.call("web_search", json!({})).await.unwrap_err();
        assert!(matches!(err, AttacheError::ToolExecution { .. }));
    }
}
