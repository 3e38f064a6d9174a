use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("source document not found: {0}")]
    MissingDocument(PathBuf),

    #[error("failed to execute pdftotext for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pdftotext returned non-zero exit status for {path}: {stderr}")]
    ToolFailed { path: PathBuf, stderr: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend failed: {0}")]
    Backend(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding contains non-finite values")]
    Malformed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("upsert of {id} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        id: String,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("chunk_size must be greater than zero")]
    InvalidChunkSize,

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    InvalidOverlap { overlap: usize, chunk_size: usize },

    #[error("corpus directory does not exist: {0}")]
    MissingCorpusDirectory(PathBuf),

    #[error("no PDFs found in {0}")]
    EmptyCorpus(PathBuf),

    #[error(
        "vector store was built with embedding model '{stored}', refusing to use '{requested}'"
    )]
    ModelMismatch { stored: String, requested: String },

    #[error("invalid filter '{0}', expected key=value")]
    InvalidFilter(String),
}

/// Failure of one document inside the pipeline. Batch processing logs these and
/// moves on to the next document.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Retrieval failure, distinct from an empty result set.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store query failed: {0}")]
    Store(#[from] StoreError),
}
