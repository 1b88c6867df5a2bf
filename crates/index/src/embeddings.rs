use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Inputs per request to the embedding service.
pub const MAX_BATCH_SIZE: usize = 50;

/// Distinguishes query from document embeddings for models trained with task prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingTask {
    SearchQuery,
    SearchDocument,
}

impl EmbeddingTask {
    pub fn prefix(&self) -> &'static str {
        match self {
            EmbeddingTask::SearchQuery => "search_query: ",
            EmbeddingTask::SearchDocument => "search_document: ",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub model: String,
    pub inputs: Vec<String>,
    pub task: Option<EmbeddingTask>,
}

impl EmbeddingRequest {
    pub fn query(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            inputs: vec![text.into()],
            task: Some(EmbeddingTask::SearchQuery),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub dimension: usize,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingBatch>;
}

/// Models whose embeddings depend on a `search_query:`/`search_document:` prefix.
pub fn requires_task_prefix(model: &str) -> bool {
    let model = model.to_lowercase();
    model.contains("nomic") || model.contains("arctic-embed")
}

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Reachability of the embedding service (Ollama's model listing).
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach embedding service")?;

        if !response.status().is_success() {
            anyhow::bail!("Embedding service health check failed: {}", response.status());
        }
        Ok(())
    }

    async fn embed_chunk(&self, model: &str, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let expected = input.len();

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { model, input })
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding request for model {} failed: {} {}", model, status, body);
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if parsed.embeddings.len() != expected {
            anyhow::bail!(
                "Embedding service returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                expected
            );
        }

        Ok(parsed.embeddings)
    }
}

impl Default for EmbeddingClient {
    fn default() -> Self {
        Self::new("http://localhost:11434".to_string())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingBatch> {
        let prefix = match request.task {
            Some(task) if requires_task_prefix(&request.model) => task.prefix(),
            _ => "",
        };

        let inputs: Vec<String> = request
            .inputs
            .iter()
            .map(|text| format!("{}{}", prefix, text))
            .collect();

        let mut vectors = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(MAX_BATCH_SIZE) {
            let embedded = self.embed_chunk(&request.model, chunk.to_vec()).await?;
            vectors.extend(embedded);
        }

        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        debug!(model = %request.model, inputs = vectors.len(), dimension, "Embedded batch");

        Ok(EmbeddingBatch { vectors, dimension })
    }
}
