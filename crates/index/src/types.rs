use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Keyword,
    Vector,
    #[default]
    Hybrid,
}

/// A scored chunk returned by the hybrid search service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedPassage {
    pub doc_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub method: RetrievalMethod,
}

impl RetrievedPassage {
    /// `doc_id:chunk_index`, the key shared with graph traversal output and labeled sets.
    pub fn key(&self) -> String {
        chunk_key(&self.doc_id, self.chunk_index)
    }
}

pub fn chunk_key(doc_id: &str, chunk_index: u32) -> String {
    format!("{}:{}", doc_id, chunk_index)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    /// First non-empty of `name`, `text`, `title`.
    pub fn display_text(&self) -> Option<&str> {
        ["name", "text", "title"]
            .iter()
            .filter_map(|key| self.properties.get(*key).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
    }

    /// Id stored as a node property, as opposed to the store's internal id.
    pub fn property_id(&self) -> Option<&str> {
        self.properties.get("id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraversalStrategy {
    #[default]
    Neighborhood,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalRequest {
    pub seeds: Vec<String>,
    pub strategy: TraversalStrategy,
    pub max_depth: usize,
    pub max_nodes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraversalResult {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Reachable passages as `doc_id:chunk_index` keys.
    pub chunk_ids: Vec<String>,
}
