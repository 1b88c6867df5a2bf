use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retry::{Rejected, RetryPolicy, is_transient};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RerankResult {
    /// Position of the document in the request.
    pub index: usize,
    pub score: f32,
    pub document: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankResponse {
    pub results: Vec<RerankResult>,
    pub processing_time_ms: f64,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankerHealth {
    pub status: String,
    pub model: String,
    pub ready: bool,
}

/// Cross-encoder scoring of (query, document) pairs.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String], top_k: Option<usize>) -> Result<RerankResponse>;
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
}

pub struct RerankerClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl RerankerClient {
    pub fn new(base_url: String, retry: RetryPolicy) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            retry,
        }
    }

    pub async fn health(&self) -> Result<RerankerHealth> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Reranker health check failed: {}", response.status());
        }
        Ok(response.json().await?)
    }

    async fn rerank_once(&self, query: &str, documents: &[String], top_k: Option<usize>) -> Result<RerankResponse> {
        let url = format!("{}/rerank", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&RerankRequest { query, documents, top_k })
            .send()
            .await
            .context("Failed to send rerank request")?;
        let response = Rejected::check("reranker", response).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Rerank request failed: {} {}", status, body);
        }

        response.json().await.context("Failed to parse rerank response")
    }
}

#[async_trait]
impl Reranker for RerankerClient {
    async fn rerank(&self, query: &str, documents: &[String], top_k: Option<usize>) -> Result<RerankResponse> {
        if documents.is_empty() {
            return Ok(RerankResponse {
                results: Vec::new(),
                processing_time_ms: 0.0,
                model: String::new(),
            });
        }

        self.retry
            .retry_if("rerank", is_transient, || self.rerank_once(query, documents, top_k))
            .await
    }
}
