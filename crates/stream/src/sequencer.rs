use index::RetrievedPassage;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::event::{StreamEvent, StreamMetadata};

#[derive(Debug, Error)]
#[error("event receiver closed")]
pub struct ReceiverClosed;

/// Emitting side of a stream: keeps sources ahead of tokens and guarantees
/// exactly one terminal event, even if the producer bails out early.
pub struct EventSequencer {
    tx: mpsc::Sender<StreamEvent>,
    sources_sent: bool,
    tokens_sent: usize,
    finished: bool,
}

impl EventSequencer {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            sources_sent: false,
            tokens_sent: 0,
            finished: false,
        }
    }

    /// Returns `Ok(false)` when the event was dropped for arriving out of order.
    pub async fn sources(
        &mut self,
        sources: Vec<RetrievedPassage>,
        has_relevant_sources: bool,
    ) -> Result<bool, ReceiverClosed> {
        if self.finished || self.sources_sent || self.tokens_sent > 0 {
            warn!("Dropping sources event emitted out of order");
            return Ok(false);
        }
        self.sources_sent = true;
        self.send(StreamEvent::Sources { sources, has_relevant_sources }).await?;
        Ok(true)
    }

    pub async fn token(&mut self, content: impl Into<String>) -> Result<(), ReceiverClosed> {
        if self.finished {
            return Ok(());
        }
        self.tokens_sent += 1;
        self.send(StreamEvent::token(content)).await
    }

    pub async fn done(&mut self, metadata: StreamMetadata) -> Result<(), ReceiverClosed> {
        self.finish(StreamEvent::Done { metadata }).await
    }

    pub async fn error(&mut self, message: impl Into<String>) -> Result<(), ReceiverClosed> {
        self.finish(StreamEvent::error(message)).await
    }

    pub fn tokens_sent(&self) -> usize {
        self.tokens_sent
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Resolves when the receiving side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    async fn finish(&mut self, event: StreamEvent) -> Result<(), ReceiverClosed> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.send(event).await
    }

    async fn send(&self, event: StreamEvent) -> Result<(), ReceiverClosed> {
        self.tx.send(event).await.map_err(|_| ReceiverClosed)
    }
}

impl Drop for EventSequencer {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.tx.try_send(StreamEvent::error("stream ended unexpectedly")) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            // channel is full: wait for the receiver to drain it
            Err(TrySendError::Full(event)) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let tx = self.tx.clone();
                    handle.spawn(async move {
                        let _ = tx.send(event).await;
                    });
                }
                Err(_) => warn!("No runtime to deliver the terminal event"),
            },
        }
    }
}
