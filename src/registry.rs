use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-document processing record, keyed by source filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub chunks: usize,
    pub chunks_failed: usize,
    pub pages: usize,
    pub size_bytes: u64,
    pub tables: usize,
    pub processed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatistics {
    pub chunks: usize,
    pub chunks_failed: usize,
    pub pages: usize,
    pub size_bytes: u64,
    pub file_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub processed_files: Vec<String>,
    pub vector_db_size: usize,
    pub per_file: BTreeMap<String, FileStatistics>,
}

/// In-memory record of what this process has indexed. Reprocessing a file
/// replaces its entry.
#[derive(Debug, Clone, Default)]
pub struct DocumentRegistry {
    files: BTreeMap<String, FileRecord>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source_file: &str, record: FileRecord) {
        self.files.insert(source_file.to_string(), record);
    }

    /// `vector_db_size` comes from the store, which may hold records written by
    /// earlier runs.
    pub fn statistics(&self, vector_db_size: usize) -> Statistics {
        let per_file = self
            .files
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    FileStatistics {
                        chunks: record.chunks,
                        chunks_failed: record.chunks_failed,
                        pages: record.pages,
                        size_bytes: record.size_bytes,
                        file_size_mb: bytes_to_mb(record.size_bytes),
                    },
                )
            })
            .collect::<BTreeMap<String, FileStatistics>>();

        Statistics {
            total_documents: self.files.len(),
            total_chunks: self.files.values().map(|record| record.chunks).sum(),
            processed_files: self.files.keys().cloned().collect(),
            vector_db_size,
            per_file,
        }
    }
}

fn bytes_to_mb(size_bytes: u64) -> f64 {
    let mb = size_bytes as f64 / (1024.0 * 1024.0);
    (mb * 100.0).round() / 100.0
}
