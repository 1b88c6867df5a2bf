use anyhow::Result;
use clap::Parser;
use eval::{
    BenchmarkHistory, BenchmarkReport, Benchmarker, default_models, default_query_set, generate_plots,
    load_query_set,
};
use index::{EmbeddingClient, HybridSearchClient, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Compare embedding models on a labeled query set.
#[derive(Parser, Debug)]
#[command(name = "run_benchmark")]
struct Args {
    #[arg(long, default_value = "http://localhost:11434")]
    embedding_url: String,

    #[arg(long, default_value = "http://localhost:8000")]
    search_url: String,

    /// Comma-separated model names; defaults to the built-in candidates
    #[arg(long, value_delimiter = ',')]
    models: Vec<String>,

    /// JSON file of `[{query, relevant_ids}]`; defaults to the built-in set
    #[arg(long)]
    queries: Option<PathBuf>,

    #[arg(long, default_value = "data/benchmark_history.jsonl")]
    history: PathBuf,

    #[arg(long, default_value = ".")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    println!("=== Embedding Model Benchmark ===\n");

    let queries = match &args.queries {
        Some(path) => load_query_set(path).await?,
        None => default_query_set(),
    };
    let models = if args.models.is_empty() { default_models() } else { args.models.clone() };
    println!("Query set: {} queries, {} candidate models\n", queries.len(), models.len());

    let benchmarker = Benchmarker::new(
        Arc::new(EmbeddingClient::new(args.embedding_url.clone())),
        Arc::new(HybridSearchClient::new(args.search_url.clone(), RetryPolicy::default())),
    )
    .with_history(Arc::new(BenchmarkHistory::new(&args.history)));

    let report = benchmarker.run_benchmark(&models, &queries).await?;
    print_report(&report);

    std::fs::create_dir_all(&args.output)?;
    let results_path = args.output.join("benchmark_results.json");
    std::fs::write(&results_path, serde_json::to_string_pretty(&report)?)?;
    println!("\n✅ Results saved to {}", results_path.display());

    generate_plots(&report.results, &args.output.join("plots"))?;
    println!("✅ Plots saved to {}", args.output.join("plots").display());

    let summary_path = args.output.join("BENCHMARK.md");
    std::fs::write(&summary_path, render_summary(&report))?;
    println!("✅ Summary saved to {}", summary_path.display());

    Ok(())
}

fn print_report(report: &BenchmarkReport) {
    println!("\n=== RESULTS ===\n");
    println!("{:<28} {:>6} {:>6} {:>6} {:>10} {:>6}", "Model", "P@5", "R@20", "MRR", "Latency", "Dim");
    for r in &report.results {
        println!(
            "{:<28} {:>6.2} {:>6.2} {:>6.2} {:>8.0}ms {:>6}",
            r.model, r.precision_at_5, r.recall_at_20, r.mrr, r.avg_latency_ms, r.dimension
        );
    }

    for skipped in &report.skipped {
        println!("⚠️  {} skipped: {}", skipped.model, skipped.reason);
    }

    if let Some(rec) = &report.recommendation {
        println!("\n🏆 Recommended: {}", rec.model);
        println!("   {}", rec.rationale);
    }
}

fn render_summary(report: &BenchmarkReport) -> String {
    let mut out = String::from(
        "# Embedding Benchmark\n\n\
         | Model | Precision@5 | Recall@20 | MRR | Mean latency | Dimension | Queries |\n\
         |-------|-------------|-----------|-----|--------------|-----------|---------|\n",
    );
    for r in &report.results {
        out.push_str(&format!(
            "| {} | {:.3} | {:.3} | {:.3} | {:.0} ms | {} | {} |\n",
            r.model, r.precision_at_5, r.recall_at_20, r.mrr, r.avg_latency_ms, r.dimension, r.query_count
        ));
    }

    if !report.skipped.is_empty() {
        out.push_str("\n## Skipped\n\n");
        for skipped in &report.skipped {
            out.push_str(&format!("- **{}**: {}\n", skipped.model, skipped.reason));
        }
    }

    if let Some(rec) = &report.recommendation {
        out.push_str(&format!("\n## Recommendation\n\n**{}**: {}\n", rec.model, rec.rationale));
    }

    out.push_str("\n![Precision vs latency](plots/precision_vs_latency.png)\n");
    out.push_str("\n![Retrieval metrics](plots/retrieval_metrics.png)\n");
    out
}
