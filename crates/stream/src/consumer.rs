use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::error::StreamError;
use crate::event::{FinishReason, StreamEvent, StreamMetadata};
use crate::frame::{Frame, FrameParser};
use crate::progress::{Progress, ProgressTracker};

/// A read that stalls this long is treated as a dropped connection.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// No generation is expected to take longer than this.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub idle_timeout: Duration,
    pub max_duration: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

/// Items delivered to the caller, in order. A token's progress update always
/// follows that token and precedes the next one.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Event(StreamEvent),
    Progress(Progress),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed {
        text: String,
        metadata: StreamMetadata,
    },
    /// The connection dropped after some text arrived. Not a failure.
    Interrupted {
        partial_text: String,
        metadata: StreamMetadata,
    },
    /// The caller cancelled. Not a failure.
    Cancelled {
        partial_text: String,
        metadata: StreamMetadata,
    },
}

impl StreamOutcome {
    pub fn text(&self) -> &str {
        match self {
            StreamOutcome::Completed { text, .. } => text,
            StreamOutcome::Interrupted { partial_text, .. } => partial_text,
            StreamOutcome::Cancelled { partial_text, .. } => partial_text,
        }
    }

    pub fn metadata(&self) -> &StreamMetadata {
        match self {
            StreamOutcome::Completed { metadata, .. }
            | StreamOutcome::Interrupted { metadata, .. }
            | StreamOutcome::Cancelled { metadata, .. } => metadata,
        }
    }
}

struct StreamState {
    parser: FrameParser,
    tracker: ProgressTracker,
    text: String,
    sources_seen: bool,
    server_metadata: Option<StreamMetadata>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            parser: FrameParser::new(),
            tracker: ProgressTracker::start(),
            text: String::new(),
            sources_seen: false,
            server_metadata: None,
        }
    }

    fn metadata(&self, finish_reason: FinishReason) -> StreamMetadata {
        let (duration_ms, tokens_per_second) = self.tracker.finish();
        let server = self.server_metadata.clone().unwrap_or_default();
        StreamMetadata {
            token_count: self.tracker.token_count(),
            duration_ms,
            tokens_per_second,
            finish_reason,
            ..server
        }
    }
}

/// Reads one framed event stream to its end.
///
/// Each call owns its own buffers, so any number of consumers can run concurrently.
pub struct StreamConsumer {
    config: ConsumerConfig,
    updates: Option<mpsc::Sender<StreamUpdate>>,
}

impl StreamConsumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self { config, updates: None }
    }

    pub fn with_updates(mut self, updates: mpsc::Sender<StreamUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub async fn consume<S, B, E>(&self, bytes: S, cancel: &CancelSignal) -> Result<StreamOutcome, StreamError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut state = StreamState::new();
        let watchdog = tokio::time::sleep(self.config.max_duration);
        tokio::pin!(watchdog);
        tokio::pin!(bytes);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(self.cancelled(state).await);
                }
                _ = &mut watchdog => {
                    return Err(self.exceeded_ceiling(state).await);
                }
                next = tokio::time::timeout(self.config.idle_timeout, bytes.next()) => next,
            };

            match next {
                Err(_) => {
                    let cause = format!("no data received for {}s", self.config.idle_timeout.as_secs());
                    return self.interrupted(state, cause).await;
                }
                Ok(Some(Err(e))) => {
                    return self.interrupted(state, e.to_string()).await;
                }
                Ok(Some(Ok(chunk))) => {
                    for frame in state.parser.push(chunk.as_ref()) {
                        if let Some(outcome) = self.handle_frame(frame, &mut state).await? {
                            return Ok(outcome);
                        }
                    }
                }
                Ok(None) => {
                    for frame in state.parser.finish() {
                        if let Some(outcome) = self.handle_frame(frame, &mut state).await? {
                            return Ok(outcome);
                        }
                    }
                    debug!("Transport closed without end marker");
                    return Ok(self.completed(&mut state).await);
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        frame: Frame,
        state: &mut StreamState,
    ) -> Result<Option<StreamOutcome>, StreamError> {
        match frame {
            Frame::End => Ok(Some(self.completed(state).await)),
            Frame::Event(StreamEvent::Sources { sources, has_relevant_sources }) => {
                if state.sources_seen || state.tracker.token_count() > 0 {
                    warn!("Ignoring out-of-order sources event");
                } else {
                    state.sources_seen = true;
                    self.emit(StreamUpdate::Event(StreamEvent::Sources {
                        sources,
                        has_relevant_sources,
                    }))
                    .await;
                }
                Ok(None)
            }
            Frame::Event(StreamEvent::Token { content }) => {
                state.text.push_str(&content);
                let progress = state.tracker.record_token();
                self.emit(StreamUpdate::Event(StreamEvent::Token { content })).await;
                self.emit(StreamUpdate::Progress(progress)).await;
                Ok(None)
            }
            Frame::Event(StreamEvent::Done { metadata }) => {
                state.server_metadata = Some(metadata);
                Ok(Some(self.completed(state).await))
            }
            Frame::Event(StreamEvent::Error { message }) => {
                self.emit(StreamUpdate::Event(StreamEvent::error(message.clone()))).await;
                Err(StreamError::Server {
                    message,
                    partial_text: std::mem::take(&mut state.text),
                })
            }
        }
    }

    async fn completed(&self, state: &mut StreamState) -> StreamOutcome {
        let metadata = state.metadata(FinishReason::Completed);
        info!(
            tokens = metadata.token_count,
            duration_ms = metadata.duration_ms,
            tokens_per_second = metadata.tokens_per_second,
            "Stream complete"
        );
        self.emit(StreamUpdate::Event(StreamEvent::Done { metadata: metadata.clone() })).await;
        StreamOutcome::Completed {
            text: std::mem::take(&mut state.text),
            metadata,
        }
    }

    async fn cancelled(&self, state: StreamState) -> StreamOutcome {
        let metadata = state.metadata(FinishReason::Cancelled);
        info!(tokens = metadata.token_count, "Stream cancelled by caller");
        self.emit(StreamUpdate::Event(StreamEvent::Done { metadata: metadata.clone() })).await;
        StreamOutcome::Cancelled {
            partial_text: state.text,
            metadata,
        }
    }

    async fn interrupted(&self, state: StreamState, cause: String) -> Result<StreamOutcome, StreamError> {
        if state.text.is_empty() {
            warn!(cause = %cause, "Stream failed before any text arrived");
            self.emit(StreamUpdate::Event(StreamEvent::error(format!("Connection lost: {}", cause))))
                .await;
            return Err(StreamError::transport("connection lost before any output", Some(cause)));
        }

        let metadata = state.metadata(FinishReason::Interrupted);
        warn!(
            cause = %cause,
            tokens = metadata.token_count,
            "Connection interrupted, keeping partial answer"
        );
        self.emit(StreamUpdate::Event(StreamEvent::Done { metadata: metadata.clone() })).await;
        Ok(StreamOutcome::Interrupted {
            partial_text: state.text,
            metadata,
        })
    }

    async fn exceeded_ceiling(&self, state: StreamState) -> StreamError {
        let limit_secs = self.config.max_duration.as_secs();
        warn!(limit_secs, tokens = state.tracker.token_count(), "Stream watchdog fired");
        self.emit(StreamUpdate::Event(StreamEvent::error(format!(
            "Stream exceeded {}s and was terminated",
            limit_secs
        ))))
        .await;
        StreamError::Timeout {
            limit_secs,
            partial_text: state.text,
        }
    }

    async fn emit(&self, update: StreamUpdate) {
        if let Some(updates) = &self.updates {
            // a caller that stopped listening still gets the returned outcome
            let _ = updates.send(update).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_end, encode_event};
    use bytes::Bytes;
    use futures::stream;
    use index::{RetrievalMethod, RetrievedPassage};

    type Chunk = Result<Bytes, std::io::Error>;

    fn token_bytes(tokens: &[&str]) -> Vec<Chunk> {
        tokens
            .iter()
            .map(|t| Ok(Bytes::from(encode_event(&StreamEvent::token(*t)))))
            .collect()
    }

    fn drain(rx: &mut mpsc::Receiver<StreamUpdate>) -> Vec<StreamUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update);
        }
        out
    }

    fn terminal_count(updates: &[StreamUpdate]) -> usize {
        updates
            .iter()
            .filter(|u| matches!(u, StreamUpdate::Event(e) if e.is_terminal()))
            .count()
    }

    #[tokio::test]
    async fn test_sources_then_tokens_then_done() {
        let sources = StreamEvent::Sources {
            sources: vec![RetrievedPassage {
                doc_id: "docA".to_string(),
                chunk_index: 0,
                text: "Ana owns billing.".to_string(),
                score: 0.8,
                method: RetrievalMethod::Hybrid,
            }],
            has_relevant_sources: true,
        };
        let mut payload = encode_event(&sources);
        payload.push_str(&encode_event(&StreamEvent::token("Ana ")));
        payload.push_str(&encode_event(&sources));
        payload.push_str(&encode_event(&StreamEvent::token("does.")));
        payload.push_str(&encode_event(&StreamEvent::Done {
            metadata: StreamMetadata {
                model: Some("llama3".to_string()),
                graph_used: true,
                ..Default::default()
            },
        }));
        payload.push_str(&encode_end());

        // deliberately awkward split points
        let bytes = payload.into_bytes();
        let chunks: Vec<Chunk> = bytes.chunks(7).map(|c| Ok(Bytes::copy_from_slice(c))).collect();

        let (tx, mut rx) = mpsc::channel(256);
        let consumer = StreamConsumer::new(ConsumerConfig::default()).with_updates(tx);
        let outcome = consumer
            .consume(stream::iter(chunks), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(outcome.text(), "Ana does.");
        assert_eq!(outcome.metadata().token_count, 2);
        assert_eq!(outcome.metadata().model.as_deref(), Some("llama3"));
        assert!(outcome.metadata().graph_used);

        let updates = drain(&mut rx);
        let sources_count = updates
            .iter()
            .filter(|u| matches!(u, StreamUpdate::Event(StreamEvent::Sources { .. })))
            .count();
        assert_eq!(sources_count, 1);
        assert!(matches!(updates[0], StreamUpdate::Event(StreamEvent::Sources { .. })));
        assert!(matches!(updates[1], StreamUpdate::Event(StreamEvent::Token { .. })));
        assert!(matches!(updates[2], StreamUpdate::Progress(Progress { token_count: 1, .. })));
        assert_eq!(terminal_count(&updates), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_with_partial_text_is_an_interruption() {
        let chunks = stream::iter(token_bytes(&["Hello", " wor"])).chain(stream::pending());

        let (tx, mut rx) = mpsc::channel(64);
        let consumer = StreamConsumer::new(ConsumerConfig::default()).with_updates(tx);
        let outcome = consumer.consume(chunks, &CancelSignal::new()).await.unwrap();

        match outcome {
            StreamOutcome::Interrupted { partial_text, metadata } => {
                assert_eq!(partial_text, "Hello wor");
                assert_eq!(metadata.finish_reason, FinishReason::Interrupted);
                assert_eq!(metadata.token_count, 2);
            }
            other => panic!("expected interruption, got {:?}", other),
        }
        assert_eq!(terminal_count(&drain(&mut rx)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_without_text_is_an_error() {
        let chunks = stream::pending::<Chunk>();

        let consumer = StreamConsumer::new(ConsumerConfig::default());
        let err = consumer.consume(chunks, &CancelSignal::new()).await.unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resolves_with_partial_text() {
        let chunks = stream::iter(token_bytes(&["Hello", " wor"])).chain(stream::pending());
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let (tx, mut rx) = mpsc::channel(64);
        let consumer = StreamConsumer::new(ConsumerConfig::default()).with_updates(tx);
        let outcome = consumer.consume(chunks, &cancel).await.unwrap();

        assert_eq!(
            outcome,
            StreamOutcome::Cancelled {
                partial_text: "Hello wor".to_string(),
                metadata: outcome.metadata().clone(),
            }
        );
        assert_eq!(outcome.metadata().finish_reason, FinishReason::Cancelled);

        let updates = drain(&mut rx);
        assert!(!updates
            .iter()
            .any(|u| matches!(u, StreamUpdate::Event(StreamEvent::Error { .. }))));
        assert_eq!(terminal_count(&updates), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_terminates_endless_stream() {
        // a token every 10s never trips the idle timeout
        let chunks = stream::unfold(0u64, |n| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            let chunk: Chunk = Ok(Bytes::from(encode_event(&StreamEvent::token("."))));
            Some((chunk, n + 1))
        });

        let (tx, mut rx) = mpsc::channel(1024);
        let consumer = StreamConsumer::new(ConsumerConfig::default()).with_updates(tx);
        let err = consumer.consume(chunks, &CancelSignal::new()).await.unwrap_err();

        match &err {
            StreamError::Timeout { limit_secs, partial_text } => {
                assert_eq!(*limit_secs, 300);
                assert!(!partial_text.is_empty());
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(!err.is_retryable());
        assert_eq!(terminal_count(&drain(&mut rx)), 1);
    }

    #[tokio::test]
    async fn test_server_error_event() {
        let mut chunks = token_bytes(&["Par"]);
        chunks.push(Ok(Bytes::from(encode_event(&StreamEvent::error("model crashed")))));

        let consumer = StreamConsumer::new(ConsumerConfig::default());
        let err = consumer
            .consume(stream::iter(chunks), &CancelSignal::new())
            .await
            .unwrap_err();

        assert_eq!(err.partial_text(), Some("Par"));
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_parsed_at_end() {
        let chunks: Vec<Chunk> = vec![Ok(Bytes::from_static(
            b"data: {\"type\":\"token\",\"content\":\"last\"}",
        ))];

        let consumer = StreamConsumer::new(ConsumerConfig::default());
        let outcome = consumer
            .consume(stream::iter(chunks), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(outcome.text(), "last");
    }
}
