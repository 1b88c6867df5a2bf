use axum::{
    Json,
    extract::{Query, State},
};
use eval::{BenchmarkReport, BenchmarkResult, MAX_HISTORY};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::metrics::TimedOperation;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct BenchmarkRequest {
    /// Candidate models; the configured list when absent or empty.
    #[serde(default)]
    pub models: Option<Vec<String>>,
}

/// `POST /benchmark`: compare embedding models on the configured query set.
pub async fn run_benchmark(
    State(state): State<Arc<AppState>>,
    request: Option<Json<BenchmarkRequest>>,
) -> Result<Json<BenchmarkReport>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let models = match request.models {
        Some(models) if !models.is_empty() => models,
        _ => state.config.benchmark.models.clone(),
    };
    if models.iter().any(|m| m.trim().is_empty()) {
        return Err(ApiError::BadRequest("model names must not be blank".to_string()));
    }

    let _guard = state
        .benchmark_lock
        .try_lock()
        .map_err(|_| ApiError::Conflict("a benchmark is already running".to_string()))?;

    info!(models = models.len(), queries = state.benchmark_queries.len(), "Benchmark requested");
    let timer = TimedOperation::start();
    let report = state
        .benchmarker
        .run_benchmark(&models, &state.benchmark_queries)
        .await?;
    state.metrics.record_benchmark(timer.elapsed());

    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

/// `GET /benchmark/history?limit=N`: newest first.
pub async fn benchmark_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<BenchmarkResult>>, ApiError> {
    let limit = params.limit.unwrap_or(MAX_HISTORY);
    Ok(Json(state.history.recent(limit).await?))
}
