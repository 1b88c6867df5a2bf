//! In-process stand-ins for the external collaborators.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use index::{
    GraphStore, HybridRetriever, RerankResponse, RerankResult, Reranker, RetrievalMethod, RetrievedPassage,
    SearchRequest, TraversalRequest, TraversalResult,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use stream::{ChatMessage, GenerationOptions};

use crate::error::QueryError;
use crate::llm::{Generator, TokenStream};

pub fn passage(doc: &str, idx: u32, text: &str, score: f32) -> RetrievedPassage {
    RetrievedPassage {
        doc_id: doc.to_string(),
        chunk_index: idx,
        text: text.to_string(),
        score,
        method: RetrievalMethod::Hybrid,
    }
}

pub struct FakeRetriever {
    pub passages: Vec<RetrievedPassage>,
    pub fail: bool,
    pub hang: bool,
    pub calls: AtomicUsize,
    pub last_request: Mutex<Option<SearchRequest>>,
}

impl FakeRetriever {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            passages,
            fail: false,
            hang: false,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// Accepts the request and never answers.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HybridRetriever for FakeRetriever {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedPassage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.hang {
            futures::future::pending::<()>().await;
        }
        if self.fail {
            return Err(anyhow!("search service unavailable"));
        }
        Ok(self.passages.clone())
    }
}

#[derive(Default)]
pub struct FakeGraph {
    pub result: TraversalResult,
    pub hang: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl GraphStore for FakeGraph {
    async fn traverse(&self, _request: &TraversalRequest) -> Result<TraversalResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            futures::future::pending::<()>().await;
        }
        Ok(self.result.clone())
    }
}

/// Scores documents by their position from the end, reversing the input order.
pub struct ReversingReranker;

#[async_trait]
impl Reranker for ReversingReranker {
    async fn rerank(&self, _query: &str, documents: &[String], _top_k: Option<usize>) -> Result<RerankResponse> {
        let results = documents
            .iter()
            .enumerate()
            .rev()
            .map(|(index, document)| RerankResult {
                index,
                score: index as f32,
                document: document.clone(),
            })
            .collect();
        Ok(RerankResponse {
            results,
            processing_time_ms: 1.0,
            model: "fake".to_string(),
        })
    }
}

/// Emits fixed tokens, then optionally never finishes.
pub struct ScriptedGenerator {
    pub tokens: Vec<String>,
    pub hang: bool,
    pub seen_messages: Mutex<Vec<ChatMessage>>,
}

impl ScriptedGenerator {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            hang: false,
            seen_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn hanging(tokens: &[&str]) -> Self {
        Self {
            hang: true,
            ..Self::new(tokens)
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn stream_chat(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _options: &GenerationOptions,
    ) -> Result<TokenStream, QueryError> {
        *self.seen_messages.lock().unwrap() = messages.to_vec();
        let tokens = futures::stream::iter(self.tokens.clone().into_iter().map(Ok));
        if self.hang {
            Ok(tokens.chain(futures::stream::pending()).boxed())
        } else {
            Ok(tokens.boxed())
        }
    }
}
