//! Per-document orchestration: extract, chunk, annotate, embed, store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::chunking::ChunkBuilder;
use crate::error::{EmbeddingError, ExtractionError, PipelineError, StoreError};
use crate::extract::{DocumentExtractor, NormalizationStats};
use crate::features::FeatureExtractor;
use crate::model::{Chunk, ChunkKind, DocumentFailure, EmbeddedChunk};
use crate::registry::{DocumentRegistry, FileRecord, Statistics};
use crate::semantic::{Embedder, validate_embedding};
use crate::store::{ChunkRecord, VectorStore, chunk_id};
use crate::util::now_utc_string;

#[derive(Debug, Clone, Default)]
pub struct ProcessingResult {
    pub source_file: String,
    pub chunk_ids: Vec<String>,
    pub chunks_stored: usize,
    pub chunks_failed: usize,
    pub text_chunks: usize,
    pub table_chunks: usize,
    pub pages: usize,
    pub tables: usize,
    pub stale_chunks_removed: usize,
    pub normalization: NormalizationStats,
}

/// Outcome of a batch, in input order. A failed document never stops the
/// batch; it lands in `failures` instead.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<ProcessingResult>,
    pub failures: Vec<DocumentFailure>,
}

pub struct DocumentPipeline {
    extractor: Box<dyn DocumentExtractor>,
    chunk_builder: ChunkBuilder,
    features: FeatureExtractor,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    registry: Mutex<DocumentRegistry>,
}

impl DocumentPipeline {
    pub fn new(
        extractor: Box<dyn DocumentExtractor>,
        chunk_builder: ChunkBuilder,
        features: FeatureExtractor,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            extractor,
            chunk_builder,
            features,
            embedder,
            store,
            registry: Mutex::new(DocumentRegistry::new()),
        }
    }

    /// Indexes one document. Chunks that fail to embed or store are logged and
    /// counted; only extraction failures (and a missing file) fail the document.
    pub fn process(&self, path: &Path) -> Result<ProcessingResult, PipelineError> {
        let source_file = source_file_name(path);
        let size_bytes = fs::metadata(path)
            .map_err(|source| ExtractionError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let document = self.extractor.extract(path)?;
        let chunks = self
            .chunk_builder
            .build(&document.lines, &document.tables);

        debug!(
            source_file = %source_file,
            lines = document.lines.len(),
            tables = document.tables.len(),
            chunks = chunks.len(),
            "document chunked"
        );

        let mut result = ProcessingResult {
            source_file: source_file.clone(),
            pages: document.page_count,
            tables: document.tables.len(),
            normalization: document.normalization,
            ..ProcessingResult::default()
        };

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            let id = chunk_id(&source_file, chunk_index);
            result.chunk_ids.push(id.clone());
            match chunk.kind() {
                ChunkKind::Text => result.text_chunks += 1,
                ChunkKind::Table => result.table_chunks += 1,
            }

            match self.index_chunk(&source_file, chunk_index, id, chunk) {
                Ok(()) => result.chunks_stored += 1,
                Err(err) => {
                    warn!(
                        source_file = %source_file,
                        chunk_index,
                        error = %err,
                        "chunk not indexed"
                    );
                    result.chunks_failed += 1;
                }
            }
        }

        match self.store.prune_source(&source_file, chunks.len()) {
            Ok(removed) => result.stale_chunks_removed = removed,
            Err(err) => warn!(
                source_file = %source_file,
                error = %err,
                "failed to prune stale chunks"
            ),
        }

        self.lock_registry().record(
            &source_file,
            FileRecord {
                chunks: result.chunks_stored,
                chunks_failed: result.chunks_failed,
                pages: result.pages,
                size_bytes,
                tables: result.tables,
                processed_at: now_utc_string(),
            },
        );

        info!(
            source_file = %source_file,
            pages = result.pages,
            chunks = result.chunks_stored,
            chunks_failed = result.chunks_failed,
            "document processed"
        );

        Ok(result)
    }

    /// Runs `process` over `paths` on `jobs` worker threads.
    pub fn process_batch(&self, paths: &[PathBuf], jobs: usize) -> Result<BatchReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .build()
            .context("failed to build document worker pool")?;

        let outcomes = pool.install(|| {
            paths
                .par_iter()
                .map(|path| (path, self.process(path)))
                .collect::<Vec<_>>()
        });

        let mut report = BatchReport::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(result) => report.results.push(result),
                Err(err) => {
                    let source_file = source_file_name(path);
                    error!(source_file = %source_file, error = %err, "document skipped");
                    report.failures.push(DocumentFailure {
                        source_file,
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    pub fn statistics(&self) -> Result<Statistics, StoreError> {
        let vector_db_size = self.store.count()?;
        Ok(self.lock_registry().statistics(vector_db_size))
    }

    fn index_chunk(
        &self,
        source_file: &str,
        chunk_index: usize,
        id: String,
        chunk: &Chunk,
    ) -> Result<(), ChunkIndexError> {
        let features = self.features.extract(&chunk.content);
        let embedding = self.embedder.embed(&chunk.content)?;
        validate_embedding(&embedding, self.embedder.model().dimensions)?;

        let embedded = EmbeddedChunk {
            chunk: chunk.clone(),
            features,
            embedding,
        };
        let record = ChunkRecord {
            id,
            source_file: source_file.to_string(),
            chunk_index,
            chunk_type: chunk.kind().as_str().to_string(),
            section_type: chunk.section().as_str().to_string(),
            content: chunk.content.clone(),
            metadata: embedded.store_metadata(source_file, chunk_index),
            embedding: embedded.embedding,
            created_at: now_utc_string(),
        };
        self.store.upsert(&record)?;
        Ok(())
    }

    // Statistics stay readable after a worker panic.
    fn lock_registry(&self) -> MutexGuard<'_, DocumentRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, thiserror::Error)]
enum ChunkIndexError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn source_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SectionClassifier;
    use crate::config::ChunkingConfig;
    use crate::extract::ExtractedDocument;
    use crate::model::{ExtractedLine, ExtractedTable};
    use crate::semantic::{LocalHashEmbedder, SemanticModelConfig, resolve_model_config};
    use crate::store::SqliteVectorStore;

    const POLICY_LINES: &[&str] = &[
        "COVERAGE DETAILS",
        "Room charges are paid in full.",
        "PREMIUM SCHEDULE",
        "Premium is due monthly.",
    ];

    /// Serves canned documents by filename; `broken.pdf` fails to extract.
    struct FakeExtractor {
        classifier: SectionClassifier,
    }

    impl FakeExtractor {
        fn new() -> Self {
            Self {
                classifier: SectionClassifier::new().unwrap(),
            }
        }

        fn lines(&self, texts: &[&str]) -> Vec<ExtractedLine> {
            texts
                .iter()
                .enumerate()
                .map(|(index, text)| ExtractedLine {
                    page: 1,
                    line: index + 1,
                    text: text.to_string(),
                    is_header: self.classifier.is_header(text),
                    section: self.classifier.classify(text),
                })
                .collect()
        }
    }

    impl DocumentExtractor for FakeExtractor {
        fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError> {
            let name = source_file_name(path);
            let lines = match name.as_str() {
                "broken.pdf" => {
                    return Err(ExtractionError::ToolFailed {
                        path: path.to_path_buf(),
                        stderr: "Syntax Error: Couldn't find trailer dictionary".to_string(),
                    });
                }
                "partial.pdf" => self.lines(&[
                    "COVERAGE DETAILS",
                    "Room charges are paid in full.",
                    "PREMIUM SCHEDULE FAIL",
                    "Premium is due monthly.",
                ]),
                _ => self.lines(POLICY_LINES),
            };

            Ok(ExtractedDocument {
                lines,
                tables: vec![ExtractedTable {
                    page: 1,
                    table_index: 0,
                    rows: vec![
                        vec!["Plan".to_string(), "Premium".to_string()],
                        vec!["Gold".to_string(), "$120.00".to_string()],
                    ],
                    method: "layout".to_string(),
                    confidence: Some(1.0),
                }],
                page_count: 1,
                normalization: NormalizationStats::default(),
            })
        }
    }

    /// Fails for any text containing `FAIL`.
    struct FlakyEmbedder {
        inner: LocalHashEmbedder,
    }

    impl Embedder for FlakyEmbedder {
        fn model(&self) -> &SemanticModelConfig {
            self.inner.model()
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("FAIL") {
                return Err(EmbeddingError::Backend("upstream timeout".to_string()));
            }
            self.inner.embed(text)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: Arc<SqliteVectorStore>,
        pipeline: DocumentPipeline,
    }

    fn fixture(files: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        for name in files {
            fs::write(root.join(name), b"%PDF-1.4 test").unwrap();
        }

        let model = resolve_model_config("");
        let store = Arc::new(SqliteVectorStore::open_in_memory(&model).unwrap());
        let pipeline = DocumentPipeline::new(
            Box::new(FakeExtractor::new()),
            ChunkBuilder::new(ChunkingConfig::new(100, 0).unwrap()),
            FeatureExtractor::new().unwrap(),
            Arc::new(FlakyEmbedder {
                inner: LocalHashEmbedder::new(model),
            }),
            store.clone(),
        );

        Fixture {
            _dir: dir,
            root,
            store,
            pipeline,
        }
    }

    #[test]
    fn reprocessing_produces_the_same_ids_without_duplicates() {
        let fixture = fixture(&["plan.pdf"]);
        let path = fixture.root.join("plan.pdf");

        let first = fixture.pipeline.process(&path).unwrap();
        let second = fixture.pipeline.process(&path).unwrap();

        assert_eq!(
            first.chunk_ids,
            vec!["plan.pdf_0", "plan.pdf_1", "plan.pdf_2"]
        );
        assert_eq!(first.chunk_ids, second.chunk_ids);
        assert_eq!((first.text_chunks, first.table_chunks), (2, 1));
        assert_eq!(fixture.store.count().unwrap(), 3);
    }

    #[test]
    fn embedding_failures_drop_only_the_affected_chunk() {
        let fixture = fixture(&["partial.pdf"]);
        let result = fixture
            .pipeline
            .process(&fixture.root.join("partial.pdf"))
            .unwrap();

        assert_eq!(result.chunks_stored, 2);
        assert_eq!(result.chunks_failed, 1);

        let stats = fixture.pipeline.statistics().unwrap();
        assert_eq!(stats.per_file["partial.pdf"].chunks, 2);
        assert_eq!(stats.per_file["partial.pdf"].chunks_failed, 1);
        assert_eq!(stats.vector_db_size, 2);
    }

    #[test]
    fn batch_skips_failed_documents_and_keeps_input_order() {
        let fixture = fixture(&["a.pdf", "broken.pdf", "c.pdf"]);
        let paths = ["a.pdf", "broken.pdf", "c.pdf", "missing.pdf"]
            .iter()
            .map(|name| fixture.root.join(name))
            .collect::<Vec<PathBuf>>();

        let report = fixture.pipeline.process_batch(&paths, 3).unwrap();

        let processed = report
            .results
            .iter()
            .map(|result| result.source_file.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(processed, vec!["a.pdf", "c.pdf"]);

        let failed = report
            .failures
            .iter()
            .map(|failure| failure.source_file.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(failed, vec!["broken.pdf", "missing.pdf"]);
        assert!(report.failures[0].error.contains("trailer dictionary"));

        let stats = fixture.pipeline.statistics().unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_chunks, 6);
        assert_eq!(stats.processed_files, vec!["a.pdf", "c.pdf"]);
    }

    #[test]
    fn stored_metadata_follows_the_chunk_contract() {
        let fixture = fixture(&["plan.pdf"]);
        fixture
            .pipeline
            .process(&fixture.root.join("plan.pdf"))
            .unwrap();

        let model = resolve_model_config("");
        let query = LocalHashEmbedder::new(model)
            .embed("Plan\tPremium\nGold\t$120.00")
            .unwrap();
        let matches = fixture.store.query(&query, 1, None).unwrap();

        let metadata = &matches[0].metadata;
        assert_eq!(metadata["source_file"], "plan.pdf");
        assert_eq!(metadata["chunk_index"], 2);
        assert_eq!(metadata["chunk_type"], "table");
        assert_eq!(metadata["section_type"], "general");
        assert_eq!(metadata["extraction_method"], "layout");
        assert_eq!(metadata["has_table_data"], true);
    }
}
