pub mod embeddings;
pub mod graph_store;
pub mod hybrid_search;
pub mod reranker;
pub mod retry;
pub mod types;

pub use embeddings::{Embedder, EmbeddingBatch, EmbeddingClient, EmbeddingRequest, EmbeddingTask};
pub use graph_store::{GraphStore, Neo4jGraphStore};
pub use hybrid_search::{HybridRetriever, HybridSearchClient, SearchRequest};
pub use reranker::{Reranker, RerankerClient, RerankResponse, RerankResult};
pub use retry::{Rejected, RetryPolicy, is_transient};
pub use types::{
    GraphEdge, GraphNode, RetrievalMethod, RetrievedPassage, TraversalRequest, TraversalResult,
    TraversalStrategy, chunk_key,
};
