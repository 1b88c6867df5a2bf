use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::{Json, extract::State};
use futures::future::join_all;
use index::{EmbeddingClient, HybridSearchClient, Neo4jGraphStore, RerankerClient};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Reachability check for one external collaborator.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self) -> Result<()>;
}

#[async_trait]
impl HealthCheck for EmbeddingClient {
    fn name(&self) -> &'static str {
        "embeddings"
    }

    async fn check(&self) -> Result<()> {
        self.health().await
    }
}

#[async_trait]
impl HealthCheck for HybridSearchClient {
    fn name(&self) -> &'static str {
        "hybrid_search"
    }

    async fn check(&self) -> Result<()> {
        self.health().await
    }
}

#[async_trait]
impl HealthCheck for Neo4jGraphStore {
    fn name(&self) -> &'static str {
        "neo4j"
    }

    async fn check(&self) -> Result<()> {
        self.ping().await
    }
}

#[async_trait]
impl HealthCheck for RerankerClient {
    fn name(&self) -> &'static str {
        "reranker"
    }

    async fn check(&self) -> Result<()> {
        let health = self.health().await?;
        if !health.ready {
            bail!("model {} not ready ({})", health.model, health.status);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub services: BTreeMap<&'static str, String>,
    pub corpus_available: bool,
    pub active_streams: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let checks = state.health_checks.iter().map(|check| async move {
        let status = match tokio::time::timeout(CHECK_TIMEOUT, check.check()).await {
            Ok(Ok(())) => "ok".to_string(),
            Ok(Err(e)) => format!("error: {:#}", e),
            Err(_) => "error: timed out".to_string(),
        };
        (check.name(), status)
    });
    let services: BTreeMap<_, _> = join_all(checks).await.into_iter().collect();

    let healthy = services.values().all(|s| s == "ok");
    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        services,
        corpus_available: state.corpus.is_available(),
        active_streams: state.streams.active(),
    })
}
