use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{Graph, Query};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::types::{GraphEdge, GraphNode, TraversalRequest, TraversalResult, chunk_key};

/// Bounded walk outward from seed entities.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn traverse(&self, request: &TraversalRequest) -> Result<TraversalResult>;
}

/// Neo4j-backed graph store.
///
/// Entities are `(:Entity {id, name, type, description})` joined by
/// `[:RELATION {type}]`; passages are `(:Chunk {doc_id, chunk_index})`
/// linked from entities by `[:MENTIONED_IN]`.
pub struct Neo4jGraphStore {
    graph: Graph,
    retry: RetryPolicy,
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph, retry: RetryPolicy) -> Self {
        Self { graph, retry }
    }

    pub async fn connect(uri: &str, user: &str, password: &str, retry: RetryPolicy) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;
        Ok(Self::new(graph, retry))
    }

    pub async fn ping(&self) -> Result<()> {
        self.graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .context("Neo4j ping failed")
    }

    async fn traverse_once(&self, request: &TraversalRequest) -> Result<TraversalResult> {
        let nodes = self.fetch_neighborhood(request).await?;
        if nodes.is_empty() {
            return Ok(TraversalResult::default());
        }

        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let edges = self.fetch_edges(&ids, request.max_nodes * 2).await?;
        let chunk_ids = self.fetch_chunk_ids(&ids).await?;

        Ok(TraversalResult { nodes, edges, chunk_ids })
    }

    async fn fetch_neighborhood(&self, request: &TraversalRequest) -> Result<Vec<GraphNode>> {
        // variable-length bounds cannot be parameters
        let cypher = format!(
            r#"
            MATCH (seed:Entity)
            WHERE toLower(seed.name) IN $seeds_lower OR seed.id IN $seeds
            MATCH (seed)-[*0..{}]-(n)
            WITH DISTINCT n LIMIT $max_nodes
            RETURN elementId(n) AS element_id, labels(n) AS labels, n.id AS id,
                   n.name AS name, n.text AS text, n.title AS title, n.type AS type
            "#,
            request.max_depth
        );

        let seeds_lower: Vec<String> = request.seeds.iter().map(|s| s.to_lowercase()).collect();
        let query = Query::new(cypher)
            .param("seeds", request.seeds.clone())
            .param("seeds_lower", seeds_lower)
            .param("max_nodes", request.max_nodes as i64);

        let mut result = self.graph.execute(query).await?;
        let mut nodes = Vec::new();

        while let Some(row) = result.next().await? {
            let element_id: String = row.get("element_id")?;
            let mut labels: Vec<String> = row.get("labels").unwrap_or_default();
            if let Ok(entity_type) = row.get::<String>("type") {
                if !labels.contains(&entity_type) {
                    labels.push(entity_type);
                }
            }

            let mut properties = Map::new();
            for key in ["id", "name", "text", "title"] {
                if let Ok(value) = row.get::<String>(key) {
                    properties.insert(key.to_string(), Value::String(value));
                }
            }

            nodes.push(GraphNode {
                id: element_id,
                labels,
                properties,
            });
        }

        Ok(nodes)
    }

    async fn fetch_edges(&self, ids: &[String], limit: usize) -> Result<Vec<GraphEdge>> {
        let query = Query::new(
            r#"
            MATCH (a)-[r]->(b)
            WHERE elementId(a) IN $ids AND elementId(b) IN $ids
            RETURN elementId(a) AS source, coalesce(r.type, type(r)) AS relation, elementId(b) AS target
            LIMIT $limit
            "#
            .to_string(),
        )
        .param("ids", ids.to_vec())
        .param("limit", limit as i64);

        let mut result = self.graph.execute(query).await?;
        let mut edges = Vec::new();

        while let Some(row) = result.next().await? {
            edges.push(GraphEdge {
                source: row.get("source")?,
                relation: row.get("relation")?,
                target: row.get("target")?,
            });
        }

        Ok(edges)
    }

    async fn fetch_chunk_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        let query = Query::new(
            r#"
            MATCH (n) WHERE elementId(n) IN $ids
            OPTIONAL MATCH (n)-[:MENTIONED_IN]->(c:Chunk)
            WITH CASE WHEN n:Chunk THEN n ELSE c END AS chunk
            WHERE chunk IS NOT NULL
            RETURN DISTINCT chunk.doc_id AS doc_id, chunk.chunk_index AS chunk_index
            "#
            .to_string(),
        )
        .param("ids", ids.to_vec());

        let mut result = self.graph.execute(query).await?;
        let mut seen = HashSet::new();
        let mut chunk_ids = Vec::new();

        while let Some(row) = result.next().await? {
            let doc_id: String = row.get("doc_id")?;
            let chunk_index: i64 = row.get("chunk_index")?;
            let key = chunk_key(&doc_id, chunk_index.max(0) as u32);
            if seen.insert(key.clone()) {
                chunk_ids.push(key);
            }
        }

        Ok(chunk_ids)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn traverse(&self, request: &TraversalRequest) -> Result<TraversalResult> {
        if request.seeds.is_empty() || request.max_nodes == 0 {
            return Ok(TraversalResult::default());
        }

        let result = self
            .retry
            .retry("graph_traversal", || self.traverse_once(request))
            .await?;

        debug!(
            seeds = request.seeds.len(),
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            chunks = result.chunk_ids.len(),
            "Graph traversal complete"
        );
        Ok(result)
    }
}
