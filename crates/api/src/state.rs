use eval::{BenchmarkHistory, Benchmarker, LabeledQuery};
use query::{ChatResponder, CorpusAvailability};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::health::HealthCheck;
use crate::metrics::Metrics;
use crate::registry::StreamRegistry;

pub struct AppState {
    pub config: AppConfig,
    pub responder: Arc<ChatResponder>,
    pub corpus: CorpusAvailability,
    pub streams: StreamRegistry,
    pub metrics: Arc<Metrics>,
    pub benchmarker: Arc<Benchmarker>,
    pub history: Arc<BenchmarkHistory>,
    pub benchmark_queries: Vec<LabeledQuery>,
    /// Held for the duration of a benchmark run; runs never overlap.
    pub benchmark_lock: Mutex<()>,
    pub health_checks: Vec<Arc<dyn HealthCheck>>,
}
