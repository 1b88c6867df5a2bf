use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use stream::{ChatStreamRequest, DONE_MARKER, EventSequencer, StreamEvent};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics::TimedOperation;
use crate::state::AppState;

pub const STREAM_ID_HEADER: &str = "x-stream-id";

/// `POST /chat/stream`: answer as server-sent events, ending with `data: [DONE]`.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatStreamRequest>,
) -> Result<Response, ApiError> {
    let has_query = request
        .retrieval
        .as_ref()
        .and_then(|r| r.query.as_deref())
        .is_some_and(|q| !q.trim().is_empty());
    if request.last_user_message().is_none() && !has_query {
        return Err(ApiError::BadRequest("request has no user message".to_string()));
    }

    let (id, cancel) = state.streams.register();
    let (tx, rx) = mpsc::channel(state.config.streaming.channel_capacity.max(1));
    state.metrics.record_stream_started();
    info!(stream_id = %id, messages = request.messages.len(), "Stream opened");

    let task_state = state.clone();
    tokio::spawn(async move {
        let timer = TimedOperation::start();
        let limit = task_state.config.streaming.max_duration_secs;
        let mut events = EventSequencer::new(tx);

        let responding = task_state.responder.respond(&request, &cancel, &mut events);
        let result = tokio::time::timeout(Duration::from_secs(limit), responding).await;
        let outcome = match result {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(stream_id = %id, limit_secs = limit, "Stream hit the duration limit");
                let _ = events.error(format!("answer exceeded the {}s limit", limit)).await;
                None
            }
        };
        drop(events);

        task_state.metrics.record_stream(outcome.as_ref(), timer.elapsed());
        task_state.streams.remove(&id);
    });

    let events = ensure_terminal(ReceiverStream::new(rx))
        .map(|event| Event::default().json_data(&event))
        .chain(futures::stream::once(async { Ok(Event::default().data(DONE_MARKER)) }));

    let keep_alive = KeepAlive::new().interval(Duration::from_secs(state.config.streaming.keep_alive_secs.max(1)));
    let mut response = Sse::new(events).keep_alive(keep_alive).into_response();
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(STREAM_ID_HEADER, value);
    }
    Ok(response)
}

/// Appends an error event when the channel closes without a terminal event.
fn ensure_terminal<S>(events: S) -> impl futures::Stream<Item = StreamEvent>
where
    S: futures::Stream<Item = StreamEvent> + Unpin,
{
    futures::stream::unfold((events, false), |(mut events, terminated)| async move {
        match events.next().await {
            Some(event) => {
                let terminated = terminated || event.is_terminal();
                Some((event, (events, terminated)))
            }
            None if terminated => None,
            None => {
                warn!("Event channel closed without a terminal event");
                Some((StreamEvent::error("stream ended unexpectedly"), (events, true)))
            }
        }
    })
}

/// `DELETE /chat/streams/:id`: stop producing a stream another connection opened.
pub async fn cancel_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.streams.cancel(&id) {
        info!(stream_id = %id, "Stream cancelled by request");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("no active stream {}", id)))
    }
}
