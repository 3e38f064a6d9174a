use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::cli::StatsArgs;
use crate::config::{manifest_dir, resolve_db_path};
use crate::registry::Statistics;
use crate::store::{SqliteVectorStore, VectorStore};

#[derive(Debug, Serialize)]
struct StatsReport {
    last_run_id: Option<String>,
    last_run_status: Option<String>,
    last_run_manifest: Option<String>,
    statistics: Statistics,
    store: StoreSummary,
}

#[derive(Debug, Serialize, Default)]
struct StoreSummary {
    db_path: String,
    model_id: Option<String>,
    records_total: usize,
    records_per_source: BTreeMap<String, usize>,
}

pub fn run(args: StatsArgs) -> Result<()> {
    let manifest_dir = manifest_dir(&args.cache_root);
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());

    info!(cache_root = %args.cache_root.display(), "stats requested");

    let mut report = StatsReport {
        last_run_id: None,
        last_run_status: None,
        last_run_manifest: None,
        statistics: Statistics::default(),
        store: StoreSummary {
            db_path: db_path.display().to_string(),
            ..StoreSummary::default()
        },
    };

    match latest_ingest_manifest(&manifest_dir)? {
        Some(path) => {
            let raw = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let manifest: Value = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;

            report.last_run_id = manifest["run_id"].as_str().map(ToOwned::to_owned);
            report.last_run_status = manifest["status"].as_str().map(ToOwned::to_owned);
            report.statistics = serde_json::from_value(manifest["statistics"].clone())
                .with_context(|| format!("invalid statistics in {}", path.display()))?;
            report.last_run_manifest = Some(path.display().to_string());
        }
        None => warn!(path = %manifest_dir.display(), "no ingest run manifest found"),
    }

    if db_path.exists() {
        let store = SqliteVectorStore::open_existing(&db_path)?;
        report.store.model_id = Some(store.model().model_id.clone());
        report.store.records_total = store.count()?;
        report.store.records_per_source = store.sources()?;
        report.statistics.vector_db_size = report.store.records_total;
    } else {
        warn!(path = %db_path.display(), "vector store missing");
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &report)
        .context("failed to serialize stats json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

/// Run manifests carry a compact UTC timestamp in their name, so the
/// lexicographically greatest one is the newest.
fn latest_ingest_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    if !manifest_dir.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<PathBuf> = None;
    let entries = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", manifest_dir.display()))?
            .path();
        let is_run_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("ingest_run_") && name.ends_with(".json"));
        if is_run_manifest && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }

    Ok(latest)
}
