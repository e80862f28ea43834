//! Pluggable web-document retrieval.
//!
//! Mirrors `heretix-llm`'s provider-adapter pattern: an async trait seam so
//! the retrieval backend (a search API, a fixed corpus for tests) can be
//! swapped without touching the fusion/resolver pipeline.

use async_trait::async_trait;
use heretix_types::Doc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search API returned no usable results")]
    NoResults,
}

#[async_trait]
pub trait WebRetriever: Send + Sync {
    async fn retrieve(&self, claim: &str, max_docs: usize) -> Result<Vec<Doc>, RetrievalError>;
}

/// Calls a configured HTTP search endpoint that returns a JSON array of
/// `{url, title, snippet, page_text}` objects, the shape most search-API
/// wrappers normalize to.
pub struct HttpSearchRetriever {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSearchRetriever {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into(), api_key }
    }
}

#[derive(serde::Deserialize)]
struct RawResult {
    url: String,
    title: Option<String>,
    snippet: Option<String>,
    page_text: Option<String>,
}

#[async_trait]
impl WebRetriever for HttpSearchRetriever {
    async fn retrieve(&self, claim: &str, max_docs: usize) -> Result<Vec<Doc>, RetrievalError> {
        let mut req = self.client.get(&self.endpoint).query(&[("q", claim), ("limit", &max_docs.to_string())]);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let results: Vec<RawResult> = req.send().await?.error_for_status()?.json().await?;
        if results.is_empty() {
            return Err(RetrievalError::NoResults);
        }

        Ok(results
            .into_iter()
            .take(max_docs)
            .map(|r| Doc {
                domain: extract_domain(&r.url),
                url: r.url,
                title: r.title,
                page_text: r.page_text.map(|t| clean_page_text(&t)),
                snippet: r.snippet.unwrap_or_default(),
                published_at_unix_ms: None,
                date_confidence: 0.0,
            })
            .collect())
    }
}

fn extract_domain(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(url)
        .trim_start_matches("www.")
        .to_string()
}

/// Search APIs sometimes return raw HTML instead of pre-cleaned text; strip
/// it down to body text so downstream scoring never sees markup.
fn clean_page_text(text: &str) -> String {
    if text.contains('<') && (text.contains("</") || text.contains("/>")) {
        heretix_extraction::extract_text(text)
    } else {
        text.to_string()
    }
}

/// Always returns a fixed, caller-supplied set of documents. Used in tests
/// and in offline/dry-run modes where outbound network access is disabled.
pub struct FixedRetriever {
    docs: Vec<Doc>,
}

impl FixedRetriever {
    pub fn new(docs: Vec<Doc>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl WebRetriever for FixedRetriever {
    async fn retrieve(&self, _claim: &str, max_docs: usize) -> Result<Vec<Doc>, RetrievalError> {
        Ok(self.docs.iter().take(max_docs).cloned().collect())
    }
}
