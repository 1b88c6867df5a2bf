use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A query with the passages (`doc_id:chunk_index`) known to answer it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledQuery {
    pub query: String,
    #[serde(default)]
    pub relevant_ids: Vec<String>,
}

impl LabeledQuery {
    pub fn new(query: &str, relevant_ids: &[&str]) -> Self {
        Self {
            query: query.to_string(),
            relevant_ids: relevant_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub fn relevant_set(&self) -> HashSet<String> {
        self.relevant_ids.iter().cloned().collect()
    }
}

pub async fn load_query_set(path: &Path) -> Result<Vec<LabeledQuery>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read query set {}", path.display()))?;
    let queries: Vec<LabeledQuery> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid query set {}", path.display()))?;
    if queries.is_empty() {
        anyhow::bail!("Query set {} is empty", path.display());
    }
    Ok(queries)
}

/// Small set matching the sample handbook corpus.
pub fn default_query_set() -> Vec<LabeledQuery> {
    vec![
        LabeledQuery::new("Who approves expense reports?", &["handbook:4", "finance-policy:0"]),
        LabeledQuery::new("How many vacation days do new employees get?", &["handbook:7"]),
        LabeledQuery::new("Which team owns the billing service?", &["org-chart:2", "billing-runbook:0"]),
        LabeledQuery::new("How do I rotate the database credentials?", &["security-runbook:3", "security-runbook:4"]),
        LabeledQuery::new(
            "Who manages the project that migrated payments to the new gateway?",
            &["payments-retro:0", "org-chart:5"],
        ),
        LabeledQuery::new("What is the on-call escalation path?", &["oncall:1", "oncall:2"]),
        LabeledQuery::new("Where are design documents stored?", &["handbook:12"]),
        LabeledQuery::new("How is the search service connected to the ingestion pipeline?", &[
            "architecture:3",
            "architecture:4",
            "ingest-runbook:1",
        ]),
    ]
}
