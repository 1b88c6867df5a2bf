use futures::StreamExt;
use std::sync::Arc;
use stream::{CancelSignal, ChatStreamRequest, EventSequencer, FinishReason, ProgressTracker, StreamMetadata};
use tracing::{info, warn};

use crate::error::QueryError;
use crate::llm::Generator;
use crate::pipeline::RagPipeline;

/// Runs one query end to end and writes its events, in protocol order, to a sequencer.
pub struct ChatResponder {
    pipeline: Arc<RagPipeline>,
    generator: Arc<dyn Generator>,
    default_model: String,
}

impl ChatResponder {
    pub fn new(pipeline: Arc<RagPipeline>, generator: Arc<dyn Generator>, default_model: String) -> Self {
        Self {
            pipeline,
            generator,
            default_model,
        }
    }

    pub fn pipeline(&self) -> &RagPipeline {
        &self.pipeline
    }

    /// Always leaves exactly one terminal event behind. Cancellation, by the
    /// signal or by the receiver going away, ends with a `done` event and `Ok`.
    pub async fn respond(
        &self,
        request: &ChatStreamRequest,
        cancel: &CancelSignal,
        events: &mut EventSequencer,
    ) -> Result<StreamMetadata, QueryError> {
        let model = request.model.clone().unwrap_or_else(|| self.default_model.clone());
        let mut metadata = StreamMetadata {
            model: Some(model.clone()),
            ..Default::default()
        };

        match self.generate(request, &model, cancel, events, &mut metadata).await {
            Ok(()) => {
                info!(
                    model = %model,
                    tokens = metadata.token_count,
                    duration_ms = metadata.duration_ms,
                    tokens_per_second = metadata.tokens_per_second,
                    "Answer streamed"
                );
                let _ = events.done(metadata.clone()).await;
                Ok(metadata)
            }
            Err(QueryError::Cancelled) => {
                info!(model = %model, tokens = metadata.token_count, "Stream cancelled");
                metadata.finish_reason = FinishReason::Cancelled;
                let _ = events.done(metadata.clone()).await;
                Ok(metadata)
            }
            Err(e) => {
                warn!(model = %model, error = %e, tokens = metadata.token_count, "Stream failed");
                let _ = events.error(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn generate(
        &self,
        request: &ChatStreamRequest,
        model: &str,
        cancel: &CancelSignal,
        events: &mut EventSequencer,
        metadata: &mut StreamMetadata,
    ) -> Result<(), QueryError> {
        let prepared = tokio::select! {
            biased;
            _ = events.closed() => return Err(QueryError::Cancelled),
            result = self.pipeline.prepare(request, cancel) => result?,
        };

        metadata.retrieval_ms = prepared.retrieval_ms;
        if let Some(refinement) = &prepared.refinement {
            metadata.graph_used = refinement.should_use_graph;
            metadata.additional_passages = refinement.additional_chunk_ids.len();
        }

        if prepared.retrieval_ran {
            events
                .sources(prepared.sources, prepared.has_relevant_sources)
                .await
                .map_err(|_| QueryError::Cancelled)?;
        }

        let mut tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            _ = events.closed() => return Err(QueryError::Cancelled),
            result = self.generator.stream_chat(model, &prepared.messages, &request.options) => result?,
        };

        let mut tracker = ProgressTracker::start();
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(QueryError::Cancelled),
                _ = events.closed() => break Err(QueryError::Cancelled),
                next = tokens.next() => next,
            };
            match next {
                Some(Ok(token)) => {
                    tracker.record_token();
                    if events.token(token).await.is_err() {
                        break Err(QueryError::Cancelled);
                    }
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };

        let (duration_ms, tokens_per_second) = tracker.finish();
        metadata.token_count = tracker.token_count();
        metadata.duration_ms = duration_ms;
        metadata.tokens_per_second = tokens_per_second;
        outcome
    }
}
