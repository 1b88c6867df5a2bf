use anyhow::Result;
use plotters::prelude::*;
use std::path::Path;
use tracing::info;

use crate::benchmark::BenchmarkResult;

/// Write `precision_vs_latency.png` and `retrieval_metrics.png` into `output_dir`.
/// Nothing is written for an empty result set.
pub fn generate_plots(results: &[BenchmarkResult], output_dir: &Path) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(output_dir)?;

    plot_precision_vs_latency(results, &output_dir.join("precision_vs_latency.png"))?;
    plot_retrieval_metrics(results, &output_dir.join("retrieval_metrics.png"))?;

    Ok(())
}

fn plot_precision_vs_latency(results: &[BenchmarkResult], path: &Path) -> Result<()> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_latency = results.iter().map(|r| r.avg_latency_ms).fold(1.0f64, f64::max);

    let mut chart = ChartBuilder::on(&root)
        .caption("Precision@5 vs Embedding Latency", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..(max_latency * 1.2), 0f64..1.0f64)?;

    chart
        .configure_mesh()
        .x_desc("Mean embedding latency (ms)")
        .y_desc("Precision@5")
        .draw()?;

    for result in results {
        let point = (result.avg_latency_ms, result.precision_at_5);
        chart.draw_series(std::iter::once(Circle::new(point, 6, BLUE.filled())))?;
        chart.draw_series(std::iter::once(Text::new(
            result.model.clone(),
            (point.0, (point.1 + 0.03).min(0.98)),
            ("sans-serif", 14),
        )))?;
    }

    root.present()?;
    info!(path = %path.display(), "Saved precision/latency plot");
    Ok(())
}

fn plot_retrieval_metrics(results: &[BenchmarkResult], path: &Path) -> Result<()> {
    let root = BitMapBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Retrieval Quality by Model", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..results.len() as f64, 0f64..1.0f64)?;

    chart.configure_mesh().y_desc("Score").draw()?;

    let series: [(&str, RGBColor, fn(&BenchmarkResult) -> f64); 3] = [
        ("P@5", RED, |r| r.precision_at_5),
        ("R@20", BLUE, |r| r.recall_at_20),
        ("MRR", GREEN, |r| r.mrr),
    ];

    for (offset, (label, color, value)) in series.iter().enumerate() {
        let color = *color;
        chart
            .draw_series(results.iter().enumerate().map(|(i, r)| {
                let left = i as f64 + 0.1 + offset as f64 * 0.27;
                Rectangle::new([(left, 0.0), (left + 0.25, value(r))], color.filled())
            }))?
            .label(*label)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    for (i, result) in results.iter().enumerate() {
        chart.draw_series(std::iter::once(Text::new(
            result.model.clone(),
            (i as f64 + 0.1, 0.97),
            ("sans-serif", 14),
        )))?;
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!(path = %path.display(), "Saved retrieval metrics plot");
    Ok(())
}
