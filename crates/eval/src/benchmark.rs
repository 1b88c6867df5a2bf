use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use index::{Embedder, EmbeddingRequest, HybridRetriever, RetrievedPassage, SearchRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::history::BenchmarkHistory;
use crate::metrics::{QueryMetrics, mean, score_query};
use crate::recommend::{Recommendation, recommend};
use crate::test_set::LabeledQuery;

/// Candidates evaluated when the caller names none.
pub const DEFAULT_MODELS: &[&str] = &[
    "nomic-embed-text",
    "mxbai-embed-large",
    "all-minilm",
    "snowflake-arctic-embed",
];

/// Retrieval depth; covers recall@20.
pub const BENCHMARK_LIMIT: usize = 20;
/// Even keyword/vector blend.
pub const BENCHMARK_ALPHA: f32 = 0.5;
/// Score every candidate.
pub const BENCHMARK_MIN_SCORE: f32 = 0.0;

const AVAILABILITY_TEXT: &str = "availability check";

/// Aggregate quality and latency of one embedding model. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkResult {
    pub model: String,
    pub precision_at_5: f64,
    pub recall_at_20: f64,
    pub mrr: f64,
    pub avg_latency_ms: f64,
    pub total_embedding_ms: f64,
    pub dimension: usize,
    pub query_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedModel {
    pub model: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Completed models, best precision@5 first.
    pub results: Vec<BenchmarkResult>,
    pub skipped: Vec<SkippedModel>,
    pub recommendation: Option<Recommendation>,
}

pub fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
}

pub struct Benchmarker {
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn HybridRetriever>,
    history: Option<Arc<BenchmarkHistory>>,
}

impl Benchmarker {
    pub fn new(embedder: Arc<dyn Embedder>, retriever: Arc<dyn HybridRetriever>) -> Self {
        Self {
            embedder,
            retriever,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<BenchmarkHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Models and queries run one at a time so latencies are measured uncontended.
    pub async fn run_benchmark(&self, models: &[String], queries: &[LabeledQuery]) -> Result<BenchmarkReport> {
        if queries.is_empty() {
            anyhow::bail!("Benchmark needs at least one labeled query");
        }
        info!(models = models.len(), queries = queries.len(), "Starting benchmark");

        let mut results = Vec::new();
        let mut skipped = Vec::new();

        for model in models {
            let dimension = match self.check_available(model).await {
                Ok(dimension) => dimension,
                Err(e) => {
                    warn!(model = %model, error = %e, "Model unavailable, skipping");
                    skipped.push(SkippedModel {
                        model: model.clone(),
                        reason: format!("unavailable: {:#}", e),
                    });
                    continue;
                }
            };

            match self.evaluate_model(model, dimension, queries).await {
                Ok(result) => {
                    info!(
                        model = %model,
                        precision_at_5 = result.precision_at_5,
                        recall_at_20 = result.recall_at_20,
                        mrr = result.mrr,
                        avg_latency_ms = result.avg_latency_ms,
                        "Model evaluated"
                    );
                    if let Some(history) = &self.history {
                        if let Err(e) = history.append(&result).await {
                            warn!(model = %model, error = %e, "Failed to record benchmark history");
                        }
                    }
                    results.push(result);
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "Model evaluation failed");
                    skipped.push(SkippedModel {
                        model: model.clone(),
                        reason: format!("failed: {:#}", e),
                    });
                }
            }
        }

        results.sort_by(|a, b| {
            b.precision_at_5
                .partial_cmp(&a.precision_at_5)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let recommendation = recommend(&results);

        Ok(BenchmarkReport {
            results,
            skipped,
            recommendation,
        })
    }

    async fn check_available(&self, model: &str) -> Result<usize> {
        let batch = self
            .embedder
            .embed(EmbeddingRequest::query(model, AVAILABILITY_TEXT))
            .await?;
        if batch.dimension == 0 {
            anyhow::bail!("model returned an empty embedding");
        }
        Ok(batch.dimension)
    }

    async fn evaluate_model(&self, model: &str, dimension: usize, queries: &[LabeledQuery]) -> Result<BenchmarkResult> {
        let mut latencies = Vec::with_capacity(queries.len());
        let mut scores: Vec<QueryMetrics> = Vec::with_capacity(queries.len());

        for labeled in queries {
            let start = Instant::now();
            let batch = self
                .embedder
                .embed(EmbeddingRequest::query(model, labeled.query.clone()))
                .await
                .with_context(|| format!("Failed to embed query '{}'", labeled.query))?;
            latencies.push(start.elapsed().as_secs_f64() * 1000.0);

            let vector = batch
                .vectors
                .into_iter()
                .next()
                .context("Embedding service returned no vector")?;

            let request = SearchRequest::new(labeled.query.clone(), BENCHMARK_LIMIT, BENCHMARK_MIN_SCORE, BENCHMARK_ALPHA)
                .with_vector(model, vector);
            let passages = self
                .retriever
                .search(&request)
                .await
                .with_context(|| format!("Search failed for '{}'", labeled.query))?;

            let keys: Vec<String> = passages.iter().map(RetrievedPassage::key).collect();
            scores.push(score_query(&keys, &labeled.relevant_set()));
        }

        let column = |f: fn(&QueryMetrics) -> f64| scores.iter().map(f).collect::<Vec<f64>>();

        Ok(BenchmarkResult {
            model: model.to_string(),
            precision_at_5: mean(&column(|m| m.precision_at_5)),
            recall_at_20: mean(&column(|m| m.recall_at_20)),
            mrr: mean(&column(|m| m.reciprocal_rank)),
            avg_latency_ms: mean(&latencies),
            total_embedding_ms: latencies.iter().sum(),
            dimension,
            query_count: queries.len(),
            timestamp: Utc::now(),
        })
    }
}
