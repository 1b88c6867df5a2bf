use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Snapshot reported after every token.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub token_count: usize,
    pub elapsed_ms: u64,
    pub tokens_per_second: f64,
}

/// Running token counter for one stream.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started: Instant,
    token_count: usize,
}

impl ProgressTracker {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            token_count: 0,
        }
    }

    pub fn record_token(&mut self) -> Progress {
        self.token_count += 1;
        self.snapshot()
    }

    pub fn snapshot(&self) -> Progress {
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64();
        Progress {
            token_count: self.token_count,
            elapsed_ms: elapsed.as_millis() as u64,
            tokens_per_second: if secs > 0.0 { self.token_count as f64 / secs } else { 0.0 },
        }
    }

    /// Final duration and throughput, throughput rounded to one decimal.
    pub fn finish(&self) -> (u64, f64) {
        let progress = self.snapshot();
        (progress.elapsed_ms, round_one_decimal(progress.tokens_per_second))
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
