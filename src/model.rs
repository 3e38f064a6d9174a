use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ChunkingConfig;
use crate::registry::Statistics;

/// Topical category assigned to a line or a chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionCategory {
    Coverage,
    Exclusion,
    Definition,
    Condition,
    Premium,
    Claim,
    Schedule,
    General,
}

impl SectionCategory {
    pub const ALL: [SectionCategory; 8] = [
        Self::Coverage,
        Self::Exclusion,
        Self::Definition,
        Self::Condition,
        Self::Premium,
        Self::Claim,
        Self::Schedule,
        Self::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coverage => "coverage",
            Self::Exclusion => "exclusion",
            Self::Definition => "definition",
            Self::Condition => "condition",
            Self::Premium => "premium",
            Self::Claim => "claim",
            Self::Schedule => "schedule",
            Self::General => "general",
        }
    }
}

impl fmt::Display for SectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown section category: {value}"))
    }
}

/// One logical line of page text, classified at extraction time.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedLine {
    pub page: usize,
    pub line: usize,
    pub text: String,
    pub is_header: bool,
    pub section: SectionCategory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTable {
    pub page: usize,
    pub table_index: usize,
    pub rows: Vec<Vec<String>>,
    pub method: String,
    pub confidence: Option<f64>,
}

impl ExtractedTable {
    /// Cells joined by tabs, rows by newlines. Rows without any content are skipped.
    pub fn flattened_text(&self) -> String {
        self.rows
            .iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|row| row.join("\t"))
            .collect::<Vec<String>>()
            .join("\n")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Table,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunkMetadata {
    pub section_type: SectionCategory,
    pub word_count: usize,
    pub char_count: usize,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableChunkMetadata {
    pub page: usize,
    pub table_index: usize,
    pub method: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkMetadata {
    Text(TextChunkMetadata),
    Table(TableChunkMetadata),
}

/// The unit of retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn kind(&self) -> ChunkKind {
        match self.metadata {
            ChunkMetadata::Text(_) => ChunkKind::Text,
            ChunkMetadata::Table(_) => ChunkKind::Table,
        }
    }

    /// Tables carry no section of their own and are filed under `general`.
    pub fn section(&self) -> SectionCategory {
        match &self.metadata {
            ChunkMetadata::Text(metadata) => metadata.section_type,
            ChunkMetadata::Table(_) => SectionCategory::General,
        }
    }

    pub fn word_count(&self) -> usize {
        match &self.metadata {
            ChunkMetadata::Text(metadata) => metadata.word_count,
            ChunkMetadata::Table(_) => self.content.split_whitespace().count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeatureSet {
    pub insurance_terms: BTreeMap<String, usize>,
    pub amounts: Vec<String>,
    pub percentages: Vec<String>,
    pub dates: Vec<String>,
    pub policy_references: Vec<String>,
    pub word_count: usize,
    pub sentence_count: usize,
    pub avg_sentence_length: f64,
    pub has_table_data: bool,
    pub has_legal_terms: bool,
    pub semantic_score: f64,
}

#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub features: FeatureSet,
    pub embedding: Vec<f32>,
}

impl EmbeddedChunk {
    /// Flat metadata persisted next to the vector. Keys other components rely on:
    /// `source_file`, `chunk_index`, `chunk_type`, `section_type`, `word_count`,
    /// followed by every feature field.
    pub fn store_metadata(&self, source_file: &str, chunk_index: usize) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("source_file".to_string(), Value::from(source_file));
        metadata.insert("chunk_index".to_string(), Value::from(chunk_index));
        metadata.insert(
            "chunk_type".to_string(),
            Value::from(self.chunk.kind().as_str()),
        );
        metadata.insert(
            "section_type".to_string(),
            Value::from(self.chunk.section().as_str()),
        );
        metadata.insert(
            "word_count".to_string(),
            Value::from(self.chunk.word_count()),
        );

        if let ChunkMetadata::Table(table) = &self.chunk.metadata {
            metadata.insert("page".to_string(), Value::from(table.page));
            metadata.insert("table_index".to_string(), Value::from(table.table_index));
            metadata.insert(
                "extraction_method".to_string(),
                Value::from(table.method.as_str()),
            );
            if let Some(confidence) = table.confidence {
                metadata.insert("extraction_confidence".to_string(), Value::from(confidence));
            }
        }

        if let Ok(Value::Object(features)) = serde_json::to_value(&self.features) {
            metadata.extend(features);
        }

        metadata
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: Map<String, Value>,
    pub similarity_score: f64,
    pub rank: usize,
}

impl RetrievalResult {
    pub fn metadata_str(&self, key: &str) -> &str {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfEntry {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub pdf_count: usize,
    pub pdfs: Vec<PdfEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub source_file: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestCounts {
    pub pdf_count: usize,
    pub processed_pdf_count: usize,
    pub failed_pdf_count: usize,
    pub chunks_stored: usize,
    pub chunks_failed: usize,
    pub text_chunks: usize,
    pub table_chunks: usize,
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub dehyphenation_merges: usize,
    pub stale_chunks_removed: usize,
    pub store_records_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub db_path: String,
    pub corpus_dir: String,
    pub model_id: String,
    pub chunking: ChunkingConfig,
    pub table_extraction: String,
    pub counts: IngestCounts,
    pub statistics: Statistics,
    pub failures: Vec<DocumentFailure>,
    pub warnings: Vec<String>,
}
