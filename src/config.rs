use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::ConfigurationError;

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_DB_FILENAME: &str = "policy_index.sqlite";

/// Word-count bounds for the chunk builder.
///
/// `chunk_overlap` is validated and recorded in run manifests, but consecutive
/// chunks are never built as overlapping windows.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigurationError> {
        if chunk_size == 0 {
            return Err(ConfigurationError::InvalidChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigurationError::InvalidOverlap {
                overlap: chunk_overlap,
                chunk_size,
            });
        }

        if chunk_overlap > 0 {
            warn!(
                chunk_overlap,
                "chunk_overlap is recorded but not applied; chunks never share content"
            );
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

pub fn require_corpus_dir(corpus_dir: &Path) -> Result<(), ConfigurationError> {
    if corpus_dir.is_dir() {
        Ok(())
    } else {
        Err(ConfigurationError::MissingCorpusDirectory(
            corpus_dir.to_path_buf(),
        ))
    }
}

pub fn resolve_db_path(cache_root: &Path, db_path: Option<&PathBuf>) -> PathBuf {
    db_path
        .cloned()
        .unwrap_or_else(|| cache_root.join(DEFAULT_DB_FILENAME))
}

pub fn manifest_dir(cache_root: &Path) -> PathBuf {
    cache_root.join("manifests")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = ChunkingConfig::new(0, 0).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidChunkSize));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = ChunkingConfig::new(10, 10).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidOverlap {
                overlap: 10,
                chunk_size: 10
            }
        ));
        assert!(ChunkingConfig::new(10, 9).is_ok());
    }

    #[test]
    fn missing_corpus_dir_is_a_configuration_error() {
        let missing = std::env::temp_dir().join("policy-rag-does-not-exist-7f3a");
        let err = require_corpus_dir(&missing).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCorpusDirectory(_)));
    }
}
