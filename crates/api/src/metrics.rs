use query::QueryError;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use stream::{FinishReason, StreamMetadata};

pub struct Metrics {
    // Streams
    streams_started: AtomicUsize,
    streams_completed: AtomicUsize,
    streams_cancelled: AtomicUsize,
    streams_failed: AtomicUsize,
    dependency_failures: AtomicUsize,

    // Generation
    total_tokens: AtomicUsize,
    total_stream_time_us: AtomicU64,

    // Retrieval (in milliseconds)
    retrievals: AtomicUsize,
    total_retrieval_time_ms: AtomicU64,
    graph_refinements: AtomicUsize,

    // Benchmarks
    benchmark_runs: AtomicUsize,
    total_benchmark_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            streams_started: AtomicUsize::new(0),
            streams_completed: AtomicUsize::new(0),
            streams_cancelled: AtomicUsize::new(0),
            streams_failed: AtomicUsize::new(0),
            dependency_failures: AtomicUsize::new(0),
            total_tokens: AtomicUsize::new(0),
            total_stream_time_us: AtomicU64::new(0),
            retrievals: AtomicUsize::new(0),
            total_retrieval_time_ms: AtomicU64::new(0),
            graph_refinements: AtomicUsize::new(0),
            benchmark_runs: AtomicUsize::new(0),
            total_benchmark_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_stream_started(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    /// `None` means the stream never reported back, e.g. it hit the server-side deadline.
    pub fn record_stream(&self, outcome: Option<&Result<StreamMetadata, QueryError>>, duration: Duration) {
        self.total_stream_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        match outcome {
            Some(Ok(metadata)) => {
                self.total_tokens.fetch_add(metadata.token_count, Ordering::Relaxed);
                if let Some(ms) = metadata.retrieval_ms {
                    self.retrievals.fetch_add(1, Ordering::Relaxed);
                    self.total_retrieval_time_ms.fetch_add(ms, Ordering::Relaxed);
                }
                if metadata.graph_used {
                    self.graph_refinements.fetch_add(1, Ordering::Relaxed);
                }
                match metadata.finish_reason {
                    FinishReason::Cancelled => self.streams_cancelled.fetch_add(1, Ordering::Relaxed),
                    _ => self.streams_completed.fetch_add(1, Ordering::Relaxed),
                };
            }
            Some(Err(e)) => {
                self.streams_failed.fetch_add(1, Ordering::Relaxed);
                if e.is_dependency() {
                    self.dependency_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                self.streams_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_benchmark(&self, duration: Duration) {
        self.benchmark_runs.fetch_add(1, Ordering::Relaxed);
        self.total_benchmark_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let started = self.streams_started.load(Ordering::Relaxed);
        let completed = self.streams_completed.load(Ordering::Relaxed);
        let cancelled = self.streams_cancelled.load(Ordering::Relaxed);
        let failed = self.streams_failed.load(Ordering::Relaxed);
        let finished = completed + cancelled + failed;

        MetricsSnapshot {
            streams_started: started,
            streams_active: started.saturating_sub(finished),
            streams_completed: completed,
            streams_cancelled: cancelled,
            streams_failed: failed,
            dependency_failures: self.dependency_failures.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            avg_stream_time_ms: avg_ms(&self.total_stream_time_us, finished),
            retrievals: self.retrievals.load(Ordering::Relaxed),
            avg_retrieval_time_ms: {
                let count = self.retrievals.load(Ordering::Relaxed);
                if count > 0 {
                    self.total_retrieval_time_ms.load(Ordering::Relaxed) as f64 / count as f64
                } else {
                    0.0
                }
            },
            graph_refinements: self.graph_refinements.load(Ordering::Relaxed),
            benchmark_runs: self.benchmark_runs.load(Ordering::Relaxed),
            avg_benchmark_time_ms: avg_ms(
                &self.total_benchmark_time_us,
                self.benchmark_runs.load(Ordering::Relaxed),
            ),
        }
    }
}

fn avg_ms(total_us: &AtomicU64, count: usize) -> f64 {
    if count > 0 {
        total_us.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub streams_started: usize,
    pub streams_active: usize,
    pub streams_completed: usize,
    pub streams_cancelled: usize,
    pub streams_failed: usize,
    pub dependency_failures: usize,
    pub total_tokens: usize,
    pub avg_stream_time_ms: f64,
    pub retrievals: usize,
    pub avg_retrieval_time_ms: f64,
    pub graph_refinements: usize,
    pub benchmark_runs: usize,
    pub avg_benchmark_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
