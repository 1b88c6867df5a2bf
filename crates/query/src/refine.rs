use extract::EntityHarvester;
use extract::normalizer::dedup;
use index::{GraphEdge, GraphNode, GraphStore, RetrievedPassage, TraversalRequest, TraversalStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::QueryError;
use crate::summary::render_graph_summary;

/// Graph refinement settings. Immutable once built; per-call changes go
/// through [`RefinementConfig::with_overrides`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefinementConfig {
    pub enabled: bool,
    pub max_depth: usize,
    pub max_nodes: usize,
    /// Fewer combined entities than this and the graph is not queried.
    pub min_entities: usize,
    /// Only passages scoring at least this much are mined for entities.
    pub min_passage_score: f32,
    /// Useful when the traversal returned more nodes than this.
    pub useful_node_threshold: usize,
    /// Useful when the query carried more known entities than this.
    pub useful_known_entity_threshold: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 2,
            max_nodes: 50,
            min_entities: 1,
            min_passage_score: 0.5,
            useful_node_threshold: 2,
            useful_known_entity_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefinementOverrides {
    pub enabled: Option<bool>,
    pub max_depth: Option<usize>,
    pub max_nodes: Option<usize>,
    pub min_entities: Option<usize>,
    pub min_passage_score: Option<f32>,
}

impl RefinementConfig {
    pub fn with_overrides(&self, overrides: &RefinementOverrides) -> Self {
        Self {
            enabled: overrides.enabled.unwrap_or(self.enabled),
            max_depth: overrides.max_depth.unwrap_or(self.max_depth),
            max_nodes: overrides.max_nodes.unwrap_or(self.max_nodes),
            min_entities: overrides.min_entities.unwrap_or(self.min_entities),
            min_passage_score: overrides.min_passage_score.unwrap_or(self.min_passage_score),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphContext {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefinementResult {
    /// Passages reached through the graph that retrieval did not return.
    pub additional_chunk_ids: Vec<String>,
    pub graph_context: GraphContext,
    pub should_use_graph: bool,
    pub summary: String,
    /// Seeds the traversal started from.
    pub entities: Vec<String>,
}

impl RefinementResult {
    fn skipped(entities: Vec<String>) -> Self {
        Self {
            entities,
            ..Default::default()
        }
    }
}

pub struct GraphRefiner {
    store: Arc<dyn GraphStore>,
    harvester: EntityHarvester,
}

impl GraphRefiner {
    pub fn new(store: Arc<dyn GraphStore>, harvester: EntityHarvester) -> Self {
        Self { store, harvester }
    }

    pub async fn refine(
        &self,
        config: &RefinementConfig,
        known_entities: &[String],
        passages: &[RetrievedPassage],
    ) -> Result<RefinementResult, QueryError> {
        if !config.enabled {
            return Ok(RefinementResult::default());
        }

        let harvested = self.harvester.harvest_all(
            passages
                .iter()
                .filter(|p| p.score >= config.min_passage_score)
                .map(|p| p.text.as_str()),
        );
        let known = dedup(known_entities.iter().cloned());
        let entities = dedup(known.iter().cloned().chain(harvested));

        if entities.len() < config.min_entities {
            debug!(
                entities = entities.len(),
                required = config.min_entities,
                "Too few entities, skipping graph traversal"
            );
            return Ok(RefinementResult::skipped(entities));
        }

        let request = TraversalRequest {
            seeds: entities.clone(),
            strategy: TraversalStrategy::Neighborhood,
            max_depth: config.max_depth,
            max_nodes: config.max_nodes,
        };
        let traversal = self.store.traverse(&request).await.map_err(QueryError::Graph)?;

        let retrieved: HashSet<String> = passages.iter().map(RetrievedPassage::key).collect();
        let additional_chunk_ids = novel_chunk_ids(&traversal.chunk_ids, &retrieved);

        let should_use_graph = traversal.nodes.len() > config.useful_node_threshold
            || !additional_chunk_ids.is_empty()
            || known.len() > config.useful_known_entity_threshold;

        let summary = render_graph_summary(&traversal.nodes, &traversal.edges);

        info!(
            seeds = entities.len(),
            nodes = traversal.nodes.len(),
            edges = traversal.edges.len(),
            additional = additional_chunk_ids.len(),
            should_use_graph,
            "Graph refinement complete"
        );

        Ok(RefinementResult {
            additional_chunk_ids,
            graph_context: GraphContext {
                nodes: traversal.nodes,
                edges: traversal.edges,
            },
            should_use_graph,
            summary,
            entities,
        })
    }
}

/// Traversal chunk ids not already retrieved, first occurrence order.
pub fn novel_chunk_ids(traversed: &[String], retrieved: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut novel = Vec::new();
    for id in traversed {
        if !retrieved.contains(id) && seen.insert(id.as_str()) {
            novel.push(id.clone());
        }
    }
    novel
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use index::{RetrievalMethod, TraversalResult};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeStore {
        result: TraversalResult,
        fail: bool,
        calls: AtomicUsize,
        last_seeds: Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn returning(result: TraversalResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                fail: false,
                calls: AtomicUsize::new(0),
                last_seeds: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                result: TraversalResult::default(),
                fail: true,
                calls: AtomicUsize::new(0),
                last_seeds: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GraphStore for FakeStore {
        async fn traverse(&self, request: &TraversalRequest) -> Result<TraversalResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_seeds.lock().unwrap() = request.seeds.clone();
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            Ok(self.result.clone())
        }
    }

    fn passage(doc: &str, idx: u32, text: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            doc_id: doc.to_string(),
            chunk_index: idx,
            text: text.to_string(),
            score,
            method: RetrievalMethod::Hybrid,
        }
    }

    fn node(id: &str, label: &str, name: &str) -> GraphNode {
        let mut properties = Map::new();
        properties.insert("name".to_string(), Value::String(name.to_string()));
        GraphNode {
            id: id.to_string(),
            labels: vec![label.to_string()],
            properties,
        }
    }

    fn refiner(store: Arc<FakeStore>) -> GraphRefiner {
        GraphRefiner::new(store, EntityHarvester::default())
    }

    #[tokio::test]
    async fn test_gating_skips_traversal() {
        let store = FakeStore::returning(TraversalResult {
            nodes: vec![node("1", "PERSON", "Ana"), node("2", "PERSON", "Bo"), node("3", "TEAM", "Ops")],
            edges: Vec::new(),
            chunk_ids: vec!["docZ:9".to_string()],
        });
        let config = RefinementConfig {
            min_entities: 2,
            ..Default::default()
        };

        let result = refiner(store.clone())
            .refine(&config, &["Billing".to_string()], &[passage("docA", 0, "lowercase only", 0.9)])
            .await
            .unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert!(!result.should_use_graph);
        assert!(result.graph_context.nodes.is_empty());
        assert!(result.additional_chunk_ids.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_never_calls_store() {
        let store = FakeStore::returning(TraversalResult::default());
        let config = RefinementConfig {
            enabled: false,
            ..Default::default()
        };

        let result = refiner(store.clone())
            .refine(&config, &["Ana".to_string(), "Bo".to_string()], &[])
            .await
            .unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert!(!result.should_use_graph);
    }

    #[tokio::test]
    async fn test_harvests_only_confident_passages() {
        let store = FakeStore::returning(TraversalResult::default());
        let passages = vec![
            passage("docA", 0, "Ana Lima leads the `billing-api` rollout.", 0.8),
            passage("docB", 0, "Grace Hopper is unrelated here.", 0.2),
        ];

        let result = refiner(store.clone())
            .refine(&RefinementConfig::default(), &["Payroll".to_string()], &passages)
            .await
            .unwrap();

        let seeds = store.last_seeds.lock().unwrap().clone();
        assert_eq!(seeds, vec!["Payroll", "Ana Lima", "billing-api"]);
        assert_eq!(result.entities, seeds);
    }

    #[tokio::test]
    async fn test_novelty_filter_and_usefulness() {
        let store = FakeStore::returning(TraversalResult {
            nodes: vec![node("1", "PERSON", "Ana")],
            edges: Vec::new(),
            chunk_ids: vec![
                "docA:0".to_string(),
                "docC:2".to_string(),
                "docC:2".to_string(),
                "docD:1".to_string(),
            ],
        });
        let passages = vec![passage("docA", 0, "text", 0.9), passage("docB", 1, "text", 0.9)];

        let result = refiner(store)
            .refine(&RefinementConfig::default(), &["Ana".to_string()], &passages)
            .await
            .unwrap();

        assert_eq!(result.additional_chunk_ids, vec!["docC:2", "docD:1"]);
        assert!(result.should_use_graph);
        assert!(result.summary.contains("People:\n- Ana"));
    }

    #[tokio::test]
    async fn test_rich_graph_is_useful_without_new_passages() {
        let store = FakeStore::returning(TraversalResult {
            nodes: vec![node("1", "PERSON", "Ana"), node("2", "PERSON", "Bo"), node("3", "TEAM", "Ops")],
            edges: Vec::new(),
            chunk_ids: vec!["docA:0".to_string()],
        });

        let result = refiner(store)
            .refine(&RefinementConfig::default(), &["Ana".to_string()], &[passage("docA", 0, "x", 0.9)])
            .await
            .unwrap();

        assert!(result.additional_chunk_ids.is_empty());
        assert!(result.should_use_graph);
    }

    #[tokio::test]
    async fn test_sparse_graph_is_not_useful() {
        let store = FakeStore::returning(TraversalResult {
            nodes: vec![node("1", "PERSON", "Ana")],
            edges: Vec::new(),
            chunk_ids: Vec::new(),
        });

        let result = refiner(store)
            .refine(&RefinementConfig::default(), &["Ana".to_string()], &[])
            .await
            .unwrap();

        assert!(!result.should_use_graph);
    }

    #[tokio::test]
    async fn test_multiple_known_entities_are_useful() {
        let store = FakeStore::returning(TraversalResult::default());

        let result = refiner(store)
            .refine(&RefinementConfig::default(), &["Ana".to_string(), "Ops".to_string()], &[])
            .await
            .unwrap();

        assert!(result.should_use_graph);
        assert_eq!(result.summary, "");
    }

    #[tokio::test]
    async fn test_traversal_failure_propagates() {
        let err = refiner(FakeStore::failing())
            .refine(&RefinementConfig::default(), &["Ana".to_string()], &[])
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Graph(_)));
        assert!(err.is_dependency());
    }

    #[test]
    fn test_overrides_merge() {
        let base = RefinementConfig::default();
        let merged = base.with_overrides(&RefinementOverrides {
            max_depth: Some(3),
            ..Default::default()
        });

        assert_eq!(merged.max_depth, 3);
        assert_eq!(merged.max_nodes, base.max_nodes);
        assert_eq!(base.max_depth, 2);

        let json = serde_json::to_value(&merged).unwrap();
        assert_eq!(json["useful_node_threshold"], json!(2));
    }

    #[test]
    fn test_novelty_is_deterministic() {
        let retrieved: HashSet<String> = ["a:0".to_string()].into_iter().collect();
        let traversed = vec!["b:1".to_string(), "a:0".to_string(), "c:0".to_string()];
        let first = novel_chunk_ids(&traversed, &retrieved);
        assert_eq!(first, novel_chunk_ids(&traversed, &retrieved));
        assert_eq!(first, vec!["b:1", "c:0"]);
    }
}
