use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::consumer::{ConsumerConfig, StreamConsumer, StreamOutcome, StreamUpdate};
use crate::error::StreamError;
use crate::event::{FinishReason, StreamEvent, StreamMetadata};
use crate::request::ChatStreamRequest;

/// Caller side of the streaming transport.
#[derive(Clone)]
pub struct StreamClient {
    base_url: String,
    client: reqwest::Client,
    config: ConsumerConfig,
}

impl StreamClient {
    pub fn new(base_url: String) -> Self {
        Self::with_config(base_url, ConsumerConfig::default())
    }

    pub fn with_config(base_url: String, config: ConsumerConfig) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Stream one answer. Updates, if requested, arrive in wire order and always
    /// end with exactly one terminal event.
    pub async fn stream_chat(
        &self,
        request: &ChatStreamRequest,
        cancel: &CancelSignal,
        updates: Option<mpsc::Sender<StreamUpdate>>,
    ) -> Result<StreamOutcome, StreamError> {
        let url = format!("{}/chat/stream", self.base_url);
        debug!(url = %url, messages = request.messages.len(), "Opening stream");

        let send = self.client.post(&url).json(request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Stream cancelled before the connection opened");
                let metadata = StreamMetadata {
                    finish_reason: FinishReason::Cancelled,
                    ..Default::default()
                };
                notify(&updates, StreamEvent::Done { metadata: metadata.clone() }).await;
                return Ok(StreamOutcome::Cancelled { partial_text: String::new(), metadata });
            }
            result = tokio::time::timeout(self.config.idle_timeout, send) => result,
        };

        let response = match response {
            Err(_) => {
                let err = StreamError::transport("timed out opening stream", None);
                notify(&updates, StreamEvent::error(err.to_string())).await;
                return Err(err);
            }
            Ok(Err(e)) => {
                let err = StreamError::transport("failed to open stream", Some(e.to_string()));
                notify(&updates, StreamEvent::error(err.to_string())).await;
                return Err(err);
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = if status.is_client_error() {
                StreamError::Configuration(format!("{}: {}", status, body))
            } else {
                StreamError::transport(format!("server returned {}", status), Some(body))
            };
            notify(&updates, StreamEvent::error(err.to_string())).await;
            return Err(err);
        }

        let mut consumer = StreamConsumer::new(self.config.clone());
        if let Some(updates) = updates {
            consumer = consumer.with_updates(updates);
        }
        consumer.consume(response.bytes_stream(), cancel).await
    }
}

async fn notify(updates: &Option<mpsc::Sender<StreamUpdate>>, event: StreamEvent) {
    if let Some(updates) = updates {
        let _ = updates.send(StreamUpdate::Event(event)).await;
    }
}
