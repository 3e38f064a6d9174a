use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EmbeddingError;

pub const DEFAULT_MODEL_ID: &str = "policy-hash-v1";
pub const DEFAULT_MODEL_NAME: &str = "local-hashed-ngrams";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const DEFAULT_BACKEND: &str = "local-hash-v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

pub fn resolve_model_config(model_id: &str) -> SemanticModelConfig {
    let trimmed = model_id.trim();
    let resolved_id = if trimmed.is_empty() {
        DEFAULT_MODEL_ID
    } else {
        trimmed
    };

    if resolved_id == DEFAULT_MODEL_ID {
        return SemanticModelConfig {
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIM,
            normalization: DEFAULT_NORMALIZATION.to_string(),
            backend: DEFAULT_BACKEND.to_string(),
        };
    }

    SemanticModelConfig {
        model_id: resolved_id.to_string(),
        model_name: resolved_id.to_string(),
        dimensions: DEFAULT_EMBEDDING_DIM,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: DEFAULT_BACKEND.to_string(),
    }
}

/// Text to fixed-length vector. Chunks and queries must go through the same
/// instance (or at least the same `model_id`), otherwise distances are meaningless.
pub trait Embedder: Send + Sync {
    fn model(&self) -> &SemanticModelConfig;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic hashed unigram/bigram embedder. No model files, no network.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    model: SemanticModelConfig,
}

impl LocalHashEmbedder {
    pub fn new(model: SemanticModelConfig) -> Self {
        Self { model }
    }
}

impl Embedder for LocalHashEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.model.dimensions == 0 {
            return Err(EmbeddingError::Backend(format!(
                "model {} has zero dimensions",
                self.model.model_id
            )));
        }
        Ok(embed_text_local(text, self.model.dimensions))
    }
}

/// Rejects vectors of the wrong length or with NaN/inf components.
pub fn validate_embedding(vector: &[f32], expected_dim: usize) -> Result<(), EmbeddingError> {
    if vector.len() != expected_dim {
        return Err(EmbeddingError::DimensionMismatch {
            expected: expected_dim,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(EmbeddingError::Malformed);
    }
    Ok(())
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

/// Cosine similarity of two vectors; 0.0 when lengths differ or either is zero.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        let (l, r) = (f64::from(*left_value), f64::from(*right_value));
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }

    dot / (left_norm.sqrt() * right_norm.sqrt())
}

/// Cosine distance in `[0, 2]`, the metric the vector store orders by.
pub fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    1.0 - cosine_similarity(left, right)
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let out = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect::<Vec<f32>>();

    if out.len() == expected_dim {
        Some(out)
    } else {
        None
    }
}

// sha256 rather than DefaultHasher: vectors persisted by one build must stay
// comparable with queries embedded by the next.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}
