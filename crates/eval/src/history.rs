use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::benchmark::BenchmarkResult;

/// Most records a history read returns.
pub const MAX_HISTORY: usize = 50;

/// Append-only JSON-lines log of benchmark results.
pub struct BenchmarkHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BenchmarkHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, result: &BenchmarkResult) -> Result<()> {
        let mut line = serde_json::to_string(result).context("Failed to serialize benchmark result")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await.context("Failed to append benchmark result")?;
        file.flush().await?;
        Ok(())
    }

    /// Newest first, at most `min(limit, MAX_HISTORY)` records.
    pub async fn recent(&self, limit: usize) -> Result<Vec<BenchmarkResult>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        };

        let mut records: Vec<BenchmarkResult> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable history record");
                    None
                }
            })
            .collect();

        records.reverse();
        records.truncate(limit.min(MAX_HISTORY));
        Ok(records)
    }
}
