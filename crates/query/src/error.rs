use thiserror::Error;

/// Failures of a single query, classified by how the caller should react.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Missing model, bad request, unreachable configuration. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Hybrid search or reranker failed.
    #[error("Retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    /// Graph traversal failed.
    #[error("Graph traversal failed: {0:#}")]
    Graph(anyhow::Error),

    /// The generation model stream broke.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// The caller went away. Not reported as a failure.
    #[error("Query cancelled")]
    Cancelled,
}

impl QueryError {
    /// Errors caused by an external collaborator rather than the request itself.
    pub fn is_dependency(&self) -> bool {
        matches!(self, QueryError::Retrieval(_) | QueryError::Graph(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}
