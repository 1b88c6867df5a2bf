use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CorpusUpdate {
    pub document_count: u64,
}

#[derive(Debug, Serialize)]
pub struct CorpusStatus {
    pub available: bool,
}

/// `PUT /corpus`: the ingestion side reports how many documents are indexed.
pub async fn update_corpus(
    State(state): State<Arc<AppState>>,
    Json(update): Json<CorpusUpdate>,
) -> Json<CorpusStatus> {
    let changed = state.corpus.set_document_count(update.document_count);
    info!(documents = update.document_count, changed, "Corpus status reported");
    Json(CorpusStatus {
        available: state.corpus.is_available(),
    })
}

pub async fn corpus_status(State(state): State<Arc<AppState>>) -> Json<CorpusStatus> {
    Json(CorpusStatus {
        available: state.corpus.is_available(),
    })
}
