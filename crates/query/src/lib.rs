pub mod activation;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod refine;
pub mod respond;
pub mod summary;

#[cfg(test)]
mod fakes;

pub use activation::{ActivationMode, ActivationPolicy, CorpusAvailability};
pub use error::QueryError;
pub use llm::{Generator, QueryLLM, TokenStream};
pub use pipeline::{PreparedContext, RagPipeline, RetrievalSettings};
pub use refine::{GraphContext, GraphRefiner, RefinementConfig, RefinementOverrides, RefinementResult};
pub use respond::ChatResponder;
