use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::chunking::ChunkBuilder;
use crate::classify::SectionClassifier;
use crate::cli::IngestArgs;
use crate::commands::{inventory, open_store};
use crate::config::{ChunkingConfig, manifest_dir};
use crate::extract::{PdftotextExtractor, table_extractor_for};
use crate::features::FeatureExtractor;
use crate::model::{IngestCounts, IngestRunManifest};
use crate::pipeline::{BatchReport, DocumentPipeline};
use crate::semantic::{Embedder, LocalHashEmbedder};
use crate::store::{STORE_SCHEMA_VERSION, VectorStore};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let chunking = ChunkingConfig::new(args.chunk_size, args.chunk_overlap)?;
    let pdf_paths = inventory::discover_pdfs(&args.corpus_dir)?;

    let manifest_dir = manifest_dir(&args.cache_root);
    ensure_directory(&manifest_dir)?;
    let ingest_manifest_path = args.ingest_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    info!(
        corpus_dir = %args.corpus_dir.display(),
        run_id = %run_id,
        pdf_count = pdf_paths.len(),
        jobs = args.jobs,
        "starting ingest"
    );

    let opened = open_store(&args.cache_root, args.db_path.as_ref(), &args.model_id)?;
    let store = Arc::new(opened.store);
    let embedder: Arc<dyn Embedder> = Arc::new(LocalHashEmbedder::new(opened.model.clone()));

    let extractor = PdftotextExtractor::new(
        SectionClassifier::new()?,
        table_extractor_for(args.table_extraction)?,
        args.max_pages_per_doc,
    );
    let pipeline = DocumentPipeline::new(
        Box::new(extractor),
        ChunkBuilder::new(chunking),
        FeatureExtractor::new()?,
        embedder,
        store.clone(),
    );

    let report = pipeline.process_batch(&pdf_paths, args.jobs)?;
    let statistics = pipeline.statistics()?;

    let mut warnings = Vec::new();
    if chunking.chunk_overlap > 0 {
        warnings.push(format!(
            "chunk_overlap={} recorded but not applied",
            chunking.chunk_overlap
        ));
    }
    for result in &report.results {
        if result.chunks_failed > 0 {
            warnings.push(format!(
                "{}: {} of {} chunks not indexed",
                result.source_file,
                result.chunks_failed,
                result.chunk_ids.len()
            ));
        }
    }

    let counts = summarize(pdf_paths.len(), &report, store.count()?);
    let status = if report.failures.is_empty() && counts.chunks_failed == 0 {
        "completed"
    } else {
        "completed_with_failures"
    };

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: STORE_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args),
        db_path: opened.db_path.display().to_string(),
        corpus_dir: args.corpus_dir.display().to_string(),
        model_id: opened.model.model_id.clone(),
        chunking,
        table_extraction: args.table_extraction.as_str().to_string(),
        counts,
        statistics,
        failures: report.failures,
        warnings,
    };

    write_json_pretty(&ingest_manifest_path, &manifest)?;

    info!(path = %ingest_manifest_path.display(), "wrote ingest run manifest");
    if manifest.counts.failed_pdf_count > 0 {
        warn!(
            failed = manifest.counts.failed_pdf_count,
            "some documents were skipped"
        );
    }
    info!(
        documents = manifest.counts.processed_pdf_count,
        chunks = manifest.counts.chunks_stored,
        store_records = manifest.counts.store_records_total,
        "ingest completed"
    );

    Ok(())
}

fn summarize(pdf_count: usize, report: &BatchReport, store_records_total: usize) -> IngestCounts {
    let mut counts = IngestCounts {
        pdf_count,
        processed_pdf_count: report.results.len(),
        failed_pdf_count: report.failures.len(),
        chunks_stored: 0,
        chunks_failed: 0,
        text_chunks: 0,
        table_chunks: 0,
        header_lines_removed: 0,
        footer_lines_removed: 0,
        dehyphenation_merges: 0,
        stale_chunks_removed: 0,
        store_records_total,
    };

    for result in &report.results {
        counts.chunks_stored += result.chunks_stored;
        counts.chunks_failed += result.chunks_failed;
        counts.text_chunks += result.text_chunks;
        counts.table_chunks += result.table_chunks;
        counts.header_lines_removed += result.normalization.header_lines_removed;
        counts.footer_lines_removed += result.normalization.footer_lines_removed;
        counts.dehyphenation_merges += result.normalization.dehyphenation_merges;
        counts.stale_chunks_removed += result.stale_chunks_removed;
    }

    counts
}

fn render_ingest_command(args: &IngestArgs) -> String {
    let mut command = vec![
        "policyrag".to_string(),
        "ingest".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--corpus-dir".to_string(),
        args.corpus_dir.display().to_string(),
    ];

    if let Some(path) = &args.db_path {
        command.push("--db-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.ingest_manifest_path {
        command.push("--ingest-manifest-path".to_string());
        command.push(path.display().to_string());
    }
    command.push("--chunk-size".to_string());
    command.push(args.chunk_size.to_string());
    command.push("--chunk-overlap".to_string());
    command.push(args.chunk_overlap.to_string());
    command.push("--model-id".to_string());
    command.push(args.model_id.clone());
    command.push("--jobs".to_string());
    command.push(args.jobs.to_string());
    if let Some(max_pages) = args.max_pages_per_doc {
        command.push("--max-pages-per-doc".to_string());
        command.push(max_pages.to_string());
    }
    command.push("--table-extraction".to_string());
    command.push(args.table_extraction.as_str().to_string());

    command.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NormalizationStats;
    use crate::model::DocumentFailure;
    use crate::pipeline::ProcessingResult;

    #[test]
    fn counts_aggregate_results_and_failures() {
        let result = |name: &str, stored: usize, failed: usize| ProcessingResult {
            source_file: name.to_string(),
            chunks_stored: stored,
            chunks_failed: failed,
            text_chunks: stored + failed - 1,
            table_chunks: 1,
            normalization: NormalizationStats {
                header_lines_removed: 2,
                footer_lines_removed: 1,
                dehyphenation_merges: 0,
            },
            ..ProcessingResult::default()
        };
        let report = BatchReport {
            results: vec![result("a.pdf", 4, 0), result("b.pdf", 2, 1)],
            failures: vec![DocumentFailure {
                source_file: "c.pdf".to_string(),
                error: "pdftotext returned non-zero exit status".to_string(),
            }],
        };

        let counts = summarize(3, &report, 9);
        assert_eq!(counts.processed_pdf_count, 2);
        assert_eq!(counts.failed_pdf_count, 1);
        assert_eq!(counts.chunks_stored, 6);
        assert_eq!(counts.chunks_failed, 1);
        assert_eq!(counts.text_chunks, 5);
        assert_eq!(counts.table_chunks, 2);
        assert_eq!(counts.header_lines_removed, 4);
        assert_eq!(counts.store_records_total, 9);
    }
}
