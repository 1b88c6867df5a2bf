use serde::{Deserialize, Serialize};

use crate::benchmark::BenchmarkResult;

/// Models within this fraction of the best precision count as contenders on latency.
pub const PRECISION_BAND: f64 = 0.9;
/// Latency differences below this are not worth giving up precision for.
pub const NEGLIGIBLE_LATENCY_MS: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub model: String,
    pub rationale: String,
    pub precision_leader: String,
    pub latency_leader: String,
}

pub fn recommend(results: &[BenchmarkResult]) -> Option<Recommendation> {
    let leader = results
        .iter()
        .reduce(|best, r| if r.precision_at_5 > best.precision_at_5 { r } else { best })?;

    let floor = leader.precision_at_5 * PRECISION_BAND;
    let fastest = results
        .iter()
        .filter(|r| r.precision_at_5 >= floor)
        .reduce(|best, r| if r.avg_latency_ms < best.avg_latency_ms { r } else { best })
        .unwrap_or(leader);

    let rationale = if fastest.model == leader.model {
        format!(
            "{} has the best precision@5 ({:.2}) and the lowest latency among close contenders ({:.0} ms)",
            leader.model, leader.precision_at_5, leader.avg_latency_ms
        )
    } else {
        let penalty = leader.avg_latency_ms - fastest.avg_latency_ms;
        if penalty < NEGLIGIBLE_LATENCY_MS {
            format!(
                "{} has the best precision@5 ({:.2}); it is only {:.0} ms slower than {}",
                leader.model, leader.precision_at_5, penalty, fastest.model
            )
        } else {
            format!(
                "{} has the best precision@5 ({:.2}) but costs {:.0} ms more per query than {} \
                 ({:.2} precision@5 at {:.0} ms); choose {} if latency matters more than accuracy",
                leader.model,
                leader.precision_at_5,
                penalty,
                fastest.model,
                fastest.precision_at_5,
                fastest.avg_latency_ms,
                fastest.model
            )
        }
    };

    Some(Recommendation {
        model: leader.model.clone(),
        rationale,
        precision_leader: leader.model.clone(),
        latency_leader: fastest.model.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(model: &str, precision: f64, latency: f64) -> BenchmarkResult {
        BenchmarkResult {
            model: model.to_string(),
            precision_at_5: precision,
            recall_at_20: 0.0,
            mrr: 0.0,
            avg_latency_ms: latency,
            total_embedding_ms: latency,
            dimension: 768,
            query_count: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_large_latency_gap_is_disclosed() {
        let results = vec![result("A", 0.80, 120.0), result("B", 0.82, 400.0)];

        let rec = recommend(&results).unwrap();

        assert_eq!(rec.model, "B");
        assert_eq!(rec.latency_leader, "A");
        assert!(rec.rationale.contains("280 ms"));
    }

    #[test]
    fn test_small_latency_gap_keeps_leader() {
        let results = vec![result("A", 0.80, 120.0), result("B", 0.82, 150.0)];

        let rec = recommend(&results).unwrap();

        assert_eq!(rec.model, "B");
        assert!(rec.rationale.contains("only 30 ms"));
    }

    #[test]
    fn test_leader_also_fastest() {
        let results = vec![result("A", 0.60, 90.0), result("B", 0.82, 100.0), result("C", 0.79, 110.0)];

        let rec = recommend(&results).unwrap();

        assert_eq!(rec.model, "B");
        assert_eq!(rec.latency_leader, "B");
    }

    #[test]
    fn test_fast_model_outside_band_is_ignored() {
        let results = vec![result("slow", 0.90, 500.0), result("fast", 0.50, 10.0)];

        let rec = recommend(&results).unwrap();
        assert_eq!(rec.latency_leader, "slow");
    }

    #[test]
    fn test_no_results() {
        assert!(recommend(&[]).is_none());
    }
}
