//! Execution manifest persisted to `<build_dir>/manifest.json`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::io::layout::ensure_dir;

/// What one Run cost and where its libraries went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub label: String,
    /// Digest of the Run's initial State; names `runs/<digest>/`.
    pub digest: String,
    pub burn_times: Vec<f64>,
    /// Digests of the member States in time order.
    pub states: Vec<String>,
    pub cache_hits: usize,
    pub transport_invocations: usize,
    /// Solver calls including retries.
    pub transmutation_invocations: usize,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub reactor: String,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Labels of States dropped as duplicates.
    #[serde(default)]
    pub duplicates: Vec<String>,
    pub runs: Vec<RunSummary>,
}

impl Manifest {
    pub fn new(reactor: &str, workers: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            reactor: reactor.to_string(),
            workers,
            started_at,
            finished_at: None,
            duplicates: Vec::new(),
            runs: Vec::new(),
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Write the manifest as pretty JSON with a trailing newline.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut buf = serde_json::to_string_pretty(manifest).context("serialize manifest")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write manifest {}", path.display()))
}

pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read manifest {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
