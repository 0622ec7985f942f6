//! Kernel Memory Index
//!
//! Client for a Kernel-Memory-compatible web service (`POST /search`), which
//! serves the embeddings produced by the ingestion job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::SearchIndex;
use crate::error::{Result, ToolsError};
use crate::model::SearchHit;

/// Kernel Memory service configuration
#[derive(Clone, Debug)]
pub struct KernelMemoryConfig {
    /// Service base URL, e.g. `http://localhost:9001`
    pub base_url: String,

    /// Value for the `Authorization` header, if the service requires one
    pub api_key: Option<String>,

    /// Index name; the service default when unset
    pub index: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl KernelMemoryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            index: None,
            timeout_secs: 30,
        }
    }

    /// Read `SEARCH_INDEX_URL` (required), `SEARCH_INDEX_API_KEY` and
    /// `SEARCH_INDEX_NAME`. Returns `None` when no service is configured.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SEARCH_INDEX_URL").ok()?;
        Some(Self {
            api_key: std::env::var("SEARCH_INDEX_API_KEY").ok(),
            index: std::env::var("SEARCH_INDEX_NAME").ok(),
            ..Self::new(base_url)
        })
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Citation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Citation {
    #[serde(default)]
    document_id: String,
    #[serde(default)]
    source_name: String,
    #[serde(default)]
    partitions: Vec<Partition>,
}

#[derive(Deserialize)]
struct Partition {
    #[serde(default)]
    text: String,
    #[serde(default)]
    relevance: f64,
}

/// Search index served over HTTP by Kernel Memory
pub struct KernelMemoryIndex {
    client: reqwest::Client,
    config: KernelMemoryConfig,
}

impl KernelMemoryIndex {
    pub fn new(config: KernelMemoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ToolsError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.config.base_url.trim_end_matches('/'))
    }

    fn into_hits(response: SearchResponse) -> Vec<SearchHit> {
        response
            .results
            .into_iter()
            .flat_map(|citation| {
                let source = if citation.source_name.is_empty() {
                    citation.document_id
                } else {
                    citation.source_name
                };
                citation
                    .partitions
                    .into_iter()
                    .map(move |p| SearchHit::new(source.clone(), p.relevance, p.text))
            })
            .collect()
    }
}

#[async_trait]
impl SearchIndex for KernelMemoryIndex {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let body = SearchRequest {
            query,
            limit,
            index: self.config.index.as_deref(),
        };

        let mut request = self.client.post(self.search_url()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ToolsError::Unavailable(format!("HTTP {status}: {detail}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ToolsError::InvalidResponse(e.to_string()))?;

        let mut hits = Self::into_hits(parsed);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);

        tracing::debug!(query, hits = hits.len(), "Kernel Memory search");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "KernelMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_maps_partitions_to_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({"query": "budget", "limit": 5})))
            .and(header("authorization", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": "budget",
                "noResult": false,
                "results": [
                    {
                        "documentId": "doc-1",
                        "sourceName": "budget.txt",
                        "partitions": [
                            {"text": "Budget grew 5%", "relevance": 0.71},
                            {"text": "Budget owners", "relevance": 0.93}
                        ]
                    },
                    {
                        "documentId": "doc-2",
                        "sourceName": "",
                        "partitions": [{"text": "Travel budget", "relevance": 0.80}]
                    }
                ]
            })))
            .mount(&server)
            .await;

        let mut config = KernelMemoryConfig::new(server.uri());
        config.api_key = Some("secret".into());
        let index = KernelMemoryIndex::new(config).unwrap();

        let hits = index.search("budget", 5).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0], SearchHit::new("budget.txt", 0.93, "Budget owners"));
        assert_eq!(hits[1].source, "doc-2");
        assert_eq!(hits[2].excerpt, "Budget grew 5%");
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
            .mount(&server)
            .await;

        let index = KernelMemoryIndex::new(KernelMemoryConfig::new(server.uri())).unwrap();
        let err = index.search("q", 5).await.unwrap_err();
        assert!(matches!(err, ToolsError::Unavailable(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": []}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let mut config = KernelMemoryConfig::new(server.uri());
        config.timeout_secs = 1;
        let index = KernelMemoryIndex::new(config).unwrap();

        assert!(matches!(
            index.search("q", 5).await,
            Err(ToolsError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let index = KernelMemoryIndex::new(KernelMemoryConfig::new(server.uri())).unwrap();
        assert!(matches!(
            index.search("q", 5).await,
            Err(ToolsError::InvalidResponse(_))
        ));
    }
}
