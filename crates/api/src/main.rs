use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    routing::{delete, get, post},
};
use eval::{BenchmarkHistory, Benchmarker, default_query_set, load_query_set};
use extract::EntityHarvester;
use index::{EmbeddingClient, HybridSearchClient, Neo4jGraphStore, RerankerClient};
use query::{ChatResponder, CorpusAvailability, GraphRefiner, QueryLLM, RagPipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

mod benchmark;
mod chat;
mod config;
mod corpus;
mod error;
mod health;
mod logging;
mod metrics;
mod registry;
mod state;

use crate::config::AppConfig;
use crate::health::HealthCheck;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::registry::StreamRegistry;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging);
    info!(mode = ?config.mode, retrieval = ?config.retrieval.mode, "Starting RAG assistant");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(build_state(config).await?);
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.streams.clone()))
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn build_state(config: AppConfig) -> Result<AppState> {
    let services = &config.services;
    let retry = config.retry.policy();

    let graph_store = Arc::new(
        Neo4jGraphStore::connect(&services.neo4j_uri, &services.neo4j_user, &services.neo4j_password, retry.clone())
            .await?,
    );
    let search = Arc::new(HybridSearchClient::new(services.search_url.clone(), retry.clone()));
    let embeddings = Arc::new(EmbeddingClient::new(services.embedding_url.clone()));

    let mut health_checks: Vec<Arc<dyn HealthCheck>> = Vec::new();
    health_checks.push(embeddings.clone());
    health_checks.push(search.clone());
    health_checks.push(graph_store.clone());

    let corpus = CorpusAvailability::new(config.corpus.initially_available);
    let mut pipeline = RagPipeline::new(
        search.clone(),
        GraphRefiner::new(graph_store, EntityHarvester::default()),
        corpus.clone(),
        config.retrieval.clone(),
        config.refinement.clone(),
    );
    if let Some(url) = &services.reranker_url {
        let reranker = Arc::new(RerankerClient::new(url.clone(), retry.clone()));
        pipeline = pipeline.with_reranker(reranker.clone());
        health_checks.push(reranker);
        info!(url = %url, "Reranking enabled");
    }

    let responder = ChatResponder::new(
        Arc::new(pipeline),
        Arc::new(QueryLLM::new(services.llm_url.clone())),
        services.generation_model.clone(),
    );

    let history = Arc::new(BenchmarkHistory::new(config.benchmark.history_path.clone()));
    let benchmarker = Benchmarker::new(embeddings, search).with_history(history.clone());
    let benchmark_queries = match &config.benchmark.query_set {
        Some(path) => load_query_set(path).await?,
        None => default_query_set(),
    };

    Ok(AppState {
        config,
        responder: Arc::new(responder),
        corpus,
        streams: StreamRegistry::new(),
        metrics: Metrics::new(),
        benchmarker: Arc::new(benchmarker),
        history,
        benchmark_queries,
        benchmark_lock: Mutex::new(()),
        health_checks,
    })
}

fn router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.concurrency.request_timeout_secs);

    // a benchmark run outlives any sensible request timeout
    let bounded = Router::new()
        .route("/health", get(health::health_check))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/chat/streams/:id", delete(chat::cancel_stream))
        .route("/corpus", get(corpus::corpus_status).put(corpus::update_corpus))
        .route("/benchmark/history", get(benchmark::benchmark_history))
        .route("/metrics", get(get_metrics))
        .layer(TimeoutLayer::new(timeout));

    Router::new()
        .route("/benchmark", post(benchmark::run_benchmark))
        .merge(bounded)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn shutdown_signal(streams: StreamRegistry) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    let cancelled = streams.cancel_all();
    info!(cancelled, "Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use eval::LabeledQuery;
    use futures::StreamExt;
    use index::{
        Embedder, EmbeddingBatch, EmbeddingRequest, GraphStore, HybridRetriever, RetrievalMethod, RetrievedPassage,
        SearchRequest, TraversalRequest, TraversalResult,
    };
    use query::{ActivationMode, Generator, QueryError, TokenStream};
    use serde_json::{Value, json};
    use stream::{ChatMessage, Frame, FrameParser, GenerationOptions, StreamEvent};
    use tower::ServiceExt;

    struct FixedSearch;

    #[async_trait]
    impl HybridRetriever for FixedSearch {
        async fn search(&self, _request: &SearchRequest) -> anyhow::Result<Vec<RetrievedPassage>> {
            Ok(vec![RetrievedPassage {
                doc_id: "billing".to_string(),
                chunk_index: 0,
                text: "Ana Souza owns the billing service.".to_string(),
                score: 0.9,
                method: RetrievalMethod::Hybrid,
            }])
        }
    }

    struct EmptyGraph;

    #[async_trait]
    impl GraphStore for EmptyGraph {
        async fn traverse(&self, _request: &TraversalRequest) -> anyhow::Result<TraversalResult> {
            Ok(TraversalResult::default())
        }
    }

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        async fn stream_chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _options: &GenerationOptions,
        ) -> Result<TokenStream, QueryError> {
            Ok(futures::stream::iter(["Ana", " owns", " it."].map(|t| Ok(t.to_string()))).boxed())
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, request: EmbeddingRequest) -> anyhow::Result<EmbeddingBatch> {
            Ok(EmbeddingBatch {
                vectors: request.inputs.iter().map(|_| vec![1.0, 0.0]).collect(),
                dimension: 2,
            })
        }
    }

    struct DownService;

    #[async_trait]
    impl HealthCheck for DownService {
        fn name(&self) -> &'static str {
            "neo4j"
        }

        async fn check(&self) -> anyhow::Result<()> {
            Err(anyhow!("connection refused"))
        }
    }

    fn test_state(history_dir: &std::path::Path) -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.retrieval.mode = ActivationMode::Always;

        let corpus = CorpusAvailability::new(true);
        let pipeline = RagPipeline::new(
            Arc::new(FixedSearch),
            GraphRefiner::new(Arc::new(EmptyGraph), EntityHarvester::default()),
            corpus.clone(),
            config.retrieval.clone(),
            config.refinement.clone(),
        );
        let history = Arc::new(BenchmarkHistory::new(history_dir.join("history.jsonl")));

        Arc::new(AppState {
            responder: Arc::new(ChatResponder::new(Arc::new(pipeline), Arc::new(Echo), "llama3".to_string())),
            corpus,
            streams: StreamRegistry::new(),
            metrics: Metrics::new(),
            benchmarker: Arc::new(
                Benchmarker::new(Arc::new(UnitEmbedder), Arc::new(FixedSearch)).with_history(history.clone()),
            ),
            history,
            benchmark_queries: vec![LabeledQuery::new("who owns billing", &["billing:0"])],
            benchmark_lock: Mutex::new(()),
            health_checks: vec![Arc::new(DownService) as Arc<dyn HealthCheck>],
            config,
        })
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_stream_emits_protocol_order() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = router(state.clone())
            .oneshot(json_request(
                "POST",
                "/chat/stream",
                json!({ "messages": [{ "role": "user", "content": "Who owns billing?" }] }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(chat::STREAM_ID_HEADER));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let frames = FrameParser::new().push(&bytes);

        assert!(matches!(
            &frames[0],
            Frame::Event(StreamEvent::Sources { has_relevant_sources: true, .. })
        ));
        let text: String = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Event(StreamEvent::Token { content }) => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Ana owns it.");
        assert!(matches!(
            &frames[frames.len() - 2],
            Frame::Event(StreamEvent::Done { metadata }) if metadata.token_count == 3
        ));
        assert_eq!(frames.last(), Some(&Frame::End));
    }

    #[tokio::test]
    async fn test_chat_stream_rejects_request_without_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(test_state(dir.path()))
            .oneshot(json_request("POST", "/chat/stream", json!({ "messages": [] })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("no user message"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_stream_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("/chat/streams/{}", uuid::Uuid::new_v4());
        let response = router(test_state(dir.path()))
            .oneshot(Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_corpus_report_toggles_availability() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = router(state.clone())
            .oneshot(json_request("PUT", "/corpus", json!({ "document_count": 0 })))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["available"], json!(false));
        assert!(!state.corpus.is_available());

        let response = router(state.clone())
            .oneshot(json_request("PUT", "/corpus", json!({ "document_count": 12 })))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["available"], json!(true));
    }

    #[tokio::test]
    async fn test_health_reports_degraded_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(test_state(dir.path()))
            .oneshot(get_request("/health"))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["status"], json!("degraded"));
        assert!(body["services"]["neo4j"].as_str().unwrap().contains("connection refused"));
        assert_eq!(body["corpus_available"], json!(true));
    }

    #[tokio::test]
    async fn test_benchmark_run_is_recorded_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = router(state.clone())
            .oneshot(json_request("POST", "/benchmark", json!({ "models": ["unit-embed"] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let report = body_json(response).await;
        assert_eq!(report["results"][0]["model"], json!("unit-embed"));
        assert_eq!(report["results"][0]["mrr"], json!(1.0));

        let response = router(state.clone())
            .oneshot(get_request("/benchmark/history?limit=5"))
            .await
            .unwrap();
        let history = body_json(response).await;
        assert_eq!(history.as_array().map(Vec::len), Some(1));
        assert_eq!(state.metrics.snapshot().benchmark_runs, 1);
    }
}
