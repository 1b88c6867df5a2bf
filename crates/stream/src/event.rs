use index::RetrievedPassage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Completed,
    Cancelled,
    Interrupted,
}

/// Aggregate numbers carried by the `done` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StreamMetadata {
    pub token_count: usize,
    pub duration_ms: u64,
    pub tokens_per_second: f64,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_ms: Option<u64>,
    #[serde(default)]
    pub graph_used: bool,
    #[serde(default)]
    pub additional_passages: usize,
}

/// One frame of a streamed answer.
///
/// Ordering on the wire: at most one `Sources`, before any `Token`; then exactly
/// one terminal `Done` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Sources {
        sources: Vec<RetrievedPassage>,
        has_relevant_sources: bool,
    },
    Token {
        content: String,
    },
    Done {
        metadata: StreamMetadata,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn token(content: impl Into<String>) -> Self {
        StreamEvent::Token { content: content.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error { message: message.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
