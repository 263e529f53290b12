//! Tavily web search and page extraction.

use anyhow::Result;
use async_trait::async_trait;
use researchloop_core::{PageExtractor, SearchHit, SearchProvider, SecretValue};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::http::send_json;

const BASE_URL: &str = "https://api.tavily.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    results: Vec<ExtractResult>,
    #[serde(default)]
    failed_results: Vec<FailedExtract>,
}

#[derive(Debug, Deserialize)]
struct ExtractResult {
    #[serde(default)]
    raw_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FailedExtract {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct TavilyClient {
    http: reqwest::Client,
    api_key: SecretValue,
}

impl TavilyClient {
    pub fn new(http: reqwest::Client, api_key: SecretValue) -> Self {
        Self { http, api_key }
    }

    fn post(&self, path: &str, body: serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{BASE_URL}{path}"))
            .bearer_auth(self.api_key.expose())
            .json(&body)
    }
}

impl std::fmt::Debug for TavilyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyClient")
            .field("api_key", &self.api_key)
            .finish()
    }
}

fn into_hits(response: SearchResponse) -> Vec<SearchHit> {
    response
        .results
        .into_iter()
        .filter_map(|result| {
            let content = unescape_html(result.content?.trim());
            if content.is_empty() {
                return None;
            }
            Some(SearchHit {
                content,
                link: result.url.filter(|url| !url.trim().is_empty()),
            })
        })
        .collect()
}

fn first_raw_content(url: &str, response: ExtractResponse) -> Option<String> {
    if let Some(content) = response
        .results
        .into_iter()
        .find_map(|result| result.raw_content.filter(|text| !text.trim().is_empty()))
    {
        return Some(content);
    }
    for failed in &response.failed_results {
        warn!(
            url = failed.url.as_deref().unwrap_or(url),
            error = failed.error.as_deref().unwrap_or("unknown error"),
            "page extraction failed"
        );
    }
    None
}

fn unescape_html(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

#[async_trait]
impl SearchProvider for TavilyClient {
    #[instrument(name = "tavily.search", skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let body = json!({ "query": query, "max_results": max_results });
        let response: SearchResponse = send_json("Tavily search", self.post("/search", body)).await?;
        let hits = into_hits(response);
        debug!(hits = hits.len(), "search completed");
        Ok(hits)
    }
}

#[async_trait]
impl PageExtractor for TavilyClient {
    #[instrument(name = "tavily.extract", skip(self))]
    async fn extract(&self, url: &str) -> Result<Option<String>> {
        let body = json!({ "urls": [url], "include_images": false });
        let response: ExtractResponse =
            send_json("Tavily extract", self.post("/extract", body)).await?;
        Ok(first_raw_content(url, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_results_become_hits() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"query": "eth fees", "results": [
                {"title": "A", "url": "https://a.example", "content": "Fees &amp; gas fell", "score": 0.9},
                {"title": "B", "url": "", "content": "No link here"},
                {"title": "C", "url": "https://c.example", "content": "   "}
            ]}"#,
        )
        .unwrap();

        let hits = into_hits(response);
        assert_eq!(
            hits,
            vec![
                SearchHit {
                    content: "Fees & gas fell".into(),
                    link: Some("https://a.example".into()),
                },
                SearchHit {
                    content: "No link here".into(),
                    link: None,
                },
            ]
        );
    }

    #[test]
    fn numeric_and_named_entities_are_decoded() {
        assert_eq!(
            unescape_html("Bitcoin&#8217;s price &mdash; up 5&#x25;"),
            "Bitcoin\u{2019}s price \u{2014} up 5%"
        );
        assert_eq!(unescape_html("fees &lt; 1 gwei"), "fees < 1 gwei");
        assert_eq!(unescape_html("no entities"), "no entities");
    }

    #[test]
    fn extract_prefers_first_non_empty_raw_content() {
        let response: ExtractResponse = serde_json::from_str(
            r#"{"results": [{"url": "https://x", "raw_content": "Full page text"}], "failed_results": []}"#,
        )
        .unwrap();
        assert_eq!(
            first_raw_content("https://x", response).as_deref(),
            Some("Full page text")
        );
    }

    #[test]
    fn failed_extraction_yields_none() {
        let response: ExtractResponse = serde_json::from_str(
            r#"{"results": [], "failed_results": [{"url": "https://x", "error": "blocked"}]}"#,
        )
        .unwrap();
        assert!(first_raw_content("https://x", response).is_none());
    }

    #[test]
    fn debug_output_hides_the_key() {
        let client = TavilyClient::new(reqwest::Client::new(), SecretValue::new("tvly-secret"));
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("tvly-secret"));
        assert!(rendered.contains("***redacted***"));
    }
}
