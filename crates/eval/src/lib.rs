pub mod benchmark;
pub mod history;
pub mod metrics;
pub mod plots;
pub mod recommend;
pub mod test_set;

pub use benchmark::{BenchmarkReport, BenchmarkResult, Benchmarker, SkippedModel, default_models};
pub use history::{BenchmarkHistory, MAX_HISTORY};
pub use metrics::{QueryMetrics, score_query};
pub use plots::generate_plots;
pub use recommend::{Recommendation, recommend};
pub use test_set::{LabeledQuery, default_query_set, load_query_set};
