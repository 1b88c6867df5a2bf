use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const PRECISION_K: usize = 5;
pub const RECALL_K: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub precision_at_5: f64,
    pub recall_at_20: f64,
    pub reciprocal_rank: f64,
}

/// Relevant items in the top `k`, over `k`. Zero when nothing was retrieved.
pub fn precision_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if k == 0 || retrieved.is_empty() {
        return 0.0;
    }
    let hits = retrieved.iter().take(k).filter(|id| relevant.contains(*id)).count();
    hits as f64 / k as f64
}

/// Relevant items in the top `k`, over the size of the relevant set.
pub fn recall_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let hits = retrieved.iter().take(k).filter(|id| relevant.contains(*id)).count();
    hits as f64 / relevant.len() as f64
}

/// 1 / rank of the first relevant item anywhere in the list.
pub fn reciprocal_rank(retrieved: &[String], relevant: &HashSet<String>) -> f64 {
    retrieved
        .iter()
        .position(|id| relevant.contains(id))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

pub fn score_query(retrieved: &[String], relevant: &HashSet<String>) -> QueryMetrics {
    QueryMetrics {
        precision_at_5: precision_at_k(retrieved, relevant, PRECISION_K),
        recall_at_20: recall_at_k(retrieved, relevant, RECALL_K),
        reciprocal_rank: reciprocal_rank(retrieved, relevant),
    }
}

/// Arithmetic mean, zero for no values.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        statistical::mean(values)
    }
}
