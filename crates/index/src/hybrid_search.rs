use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retry::{Rejected, RetryPolicy, is_transient};
use crate::types::RetrievedPassage;

/// Request to the hybrid (keyword + vector) search service.
///
/// `alpha` blends the two rankings: 0 is pure keyword, 1 is pure vector.
/// The blending itself happens in the service.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub min_score: f32,
    pub alpha: f32,
    /// Precomputed query vector, used when a caller wants a specific embedding model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize, min_score: f32, alpha: f32) -> Self {
        Self {
            query: query.into(),
            limit,
            min_score,
            alpha: alpha.clamp(0.0, 1.0),
            vector: None,
            model: None,
        }
    }

    pub fn with_vector(mut self, model: impl Into<String>, vector: Vec<f32>) -> Self {
        self.model = Some(model.into());
        self.vector = Some(vector);
        self
    }
}

/// Results come back in descending score order.
#[async_trait]
pub trait HybridRetriever: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedPassage>>;
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RetrievedPassage>,
}

pub struct HybridSearchClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HybridSearchClient {
    pub fn new(base_url: String, retry: RetryPolicy) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            retry,
        }
    }

    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Hybrid search health check failed: {}", response.status());
        }
        Ok(())
    }

    async fn search_once(&self, request: &SearchRequest) -> Result<Vec<RetrievedPassage>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to send search request")?;
        let response = Rejected::check("hybrid search", response).await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Hybrid search failed: {}", error_text);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to parse search response")?;

        Ok(parsed.results)
    }
}

#[async_trait]
impl HybridRetriever for HybridSearchClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedPassage>> {
        let results = self
            .retry
            .retry_if("hybrid_search", is_transient, || self.search_once(request))
            .await?;

        debug!(
            results = results.len(),
            limit = request.limit,
            alpha = request.alpha,
            "Hybrid search complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RetrievalMethod;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_alpha_is_clamped() {
        assert_eq!(SearchRequest::new("q", 5, 0.0, 1.7).alpha, 1.0);
        assert_eq!(SearchRequest::new("q", 5, 0.0, -0.2).alpha, 0.0);
    }

    #[tokio::test]
    async fn test_search_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({ "query": "billing owner", "limit": 5, "alpha": 0.5 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "doc_id": "docA", "chunk_index": 1, "text": "Ana owns billing.", "score": 0.91, "method": "hybrid" },
                    { "doc_id": "docB", "chunk_index": 0, "text": "Billing runs nightly.", "score": 0.40, "method": "keyword" }
                ]
            })))
            .mount(&server)
            .await;

        let client = HybridSearchClient::new(server.uri(), RetryPolicy::none());
        let results = client
            .search(&SearchRequest::new("billing owner", 5, 0.0, 0.5))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key(), "docA:1");
        assert_eq!(results[1].method, RetrievalMethod::Keyword);
    }

    #[tokio::test]
    async fn test_service_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("index offline"))
            .mount(&server)
            .await;

        let client = HybridSearchClient::new(server.uri(), RetryPolicy::none());
        let err = client
            .search(&SearchRequest::new("q", 5, 0.0, 0.5))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("index offline"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HybridSearchClient::new(server.uri(), RetryPolicy::new(2, 1, 1));
        let err = client
            .search(&SearchRequest::new("q", 5, 0.0, 0.5))
            .await
            .unwrap_err();

        let rejected = err.downcast_ref::<Rejected>().unwrap();
        assert_eq!(rejected.status, 401);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("index offline"))
            .mount(&server)
            .await;

        let client = HybridSearchClient::new(server.uri(), RetryPolicy::new(2, 1, 1));
        let err = client
            .search(&SearchRequest::new("q", 5, 0.0, 0.5))
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<Rejected>().is_none());
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }
}
