use extract::EntityHarvester;
use extract::normalizer::dedup;
use index::{HybridRetriever, Reranker, RetrievedPassage, SearchRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use stream::{CancelSignal, ChatMessage, ChatStreamRequest, RetrievalOptions};
use tracing::{debug, info, warn};

use crate::activation::{ActivationMode, ActivationPolicy, CorpusAvailability};
use crate::error::QueryError;
use crate::prompt::build_messages;
use crate::refine::{GraphRefiner, RefinementConfig, RefinementOverrides, RefinementResult};

/// Server-side retrieval defaults; request fields override them per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub mode: ActivationMode,
    pub limit: usize,
    pub min_score: f32,
    pub alpha: f32,
    /// A passage at or above this score counts as a relevant source.
    pub relevance_floor: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            mode: ActivationMode::Automatic,
            limit: 10,
            min_score: 0.0,
            alpha: 0.5,
            relevance_floor: 0.5,
        }
    }
}

/// Everything generation needs, computed once per query.
#[derive(Debug, Clone, Default)]
pub struct PreparedContext {
    pub messages: Vec<ChatMessage>,
    pub retrieval_ran: bool,
    pub sources: Vec<RetrievedPassage>,
    pub has_relevant_sources: bool,
    pub refinement: Option<RefinementResult>,
    pub known_entities: Vec<String>,
    pub retrieval_ms: Option<u64>,
}

pub struct RagPipeline {
    retriever: Arc<dyn HybridRetriever>,
    reranker: Option<Arc<dyn Reranker>>,
    refiner: GraphRefiner,
    harvester: EntityHarvester,
    corpus: CorpusAvailability,
    settings: RetrievalSettings,
    refinement: RefinementConfig,
}

impl RagPipeline {
    pub fn new(
        retriever: Arc<dyn HybridRetriever>,
        refiner: GraphRefiner,
        corpus: CorpusAvailability,
        settings: RetrievalSettings,
        refinement: RefinementConfig,
    ) -> Self {
        Self {
            retriever,
            reranker: None,
            refiner,
            harvester: EntityHarvester::default(),
            corpus,
            settings,
            refinement,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn corpus(&self) -> &CorpusAvailability {
        &self.corpus
    }

    /// Decide on retrieval, run it, widen it through the graph and build the prompt.
    ///
    /// Cancelling `cancel` abandons whichever dependency call is in flight.
    pub async fn prepare(
        &self,
        request: &ChatStreamRequest,
        cancel: &CancelSignal,
    ) -> Result<PreparedContext, QueryError> {
        let options = request.retrieval.clone().unwrap_or_default();
        let query = options
            .query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .or_else(|| request.last_user_message())
            .ok_or_else(|| QueryError::Configuration("request has no user message".to_string()))?;

        let known_entities = dedup(options.entities.iter().cloned().chain(self.harvester.harvest(query)));
        let policy = ActivationPolicy::new(self.settings.mode, options.enabled);

        if !policy.should_activate(query, known_entities.len(), &self.corpus) {
            return Ok(PreparedContext {
                messages: build_messages(&request.messages, &[], None),
                known_entities,
                ..Default::default()
            });
        }

        let started = Instant::now();
        let search = SearchRequest::new(
            query,
            options.limit.unwrap_or(self.settings.limit),
            options.min_score.unwrap_or(self.settings.min_score),
            options.alpha.unwrap_or(self.settings.alpha),
        );

        let mut passages = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = self.retriever.search(&search) => result.map_err(QueryError::Retrieval)?,
        };
        debug!(passages = passages.len(), "Hybrid search returned");

        if let Some(reranker) = &self.reranker {
            passages = self.rerank(reranker.as_ref(), query, passages, cancel).await?;
        }

        let config = self.refinement.with_overrides(&refinement_overrides(&options));
        let refinement = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = self.refiner.refine(&config, &known_entities, &passages) => result?,
        };

        let has_relevant_sources = passages.iter().any(|p| p.score >= self.settings.relevance_floor);
        let graph_summary = refinement
            .should_use_graph
            .then_some(refinement.summary.as_str());
        let messages = build_messages(&request.messages, &passages, graph_summary);
        let retrieval_ms = started.elapsed().as_millis() as u64;

        info!(
            passages = passages.len(),
            has_relevant_sources,
            graph_used = refinement.should_use_graph,
            retrieval_ms,
            "Retrieval context prepared"
        );

        Ok(PreparedContext {
            messages,
            retrieval_ran: true,
            sources: passages,
            has_relevant_sources,
            refinement: Some(refinement),
            known_entities,
            retrieval_ms: Some(retrieval_ms),
        })
    }

    async fn rerank(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        passages: Vec<RetrievedPassage>,
        cancel: &CancelSignal,
    ) -> Result<Vec<RetrievedPassage>, QueryError> {
        if passages.len() < 2 {
            return Ok(passages);
        }

        let documents: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = reranker.rerank(query, &documents, None) => result.map_err(QueryError::Retrieval)?,
        };
        response
            .results
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut slots: Vec<Option<RetrievedPassage>> = passages.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        for result in &response.results {
            match slots.get_mut(result.index).and_then(Option::take) {
                Some(passage) => ordered.push(passage),
                None => warn!(index = result.index, "Reranker returned an unknown document index"),
            }
        }
        // unscored passages keep their search order at the tail
        ordered.extend(slots.into_iter().flatten());

        debug!(model = %response.model, ms = response.processing_time_ms, "Passages reranked");
        Ok(ordered)
    }
}

fn refinement_overrides(options: &RetrievalOptions) -> RefinementOverrides {
    RefinementOverrides {
        enabled: options.graph_enabled,
        max_depth: options.graph_max_depth,
        max_nodes: options.graph_max_nodes,
        ..Default::default()
    }
}
