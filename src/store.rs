//! Vector store boundary and its sqlite implementation.
//!
//! Records are keyed by `"{source_file}_{chunk_index}"`, so re-ingesting a
//! document overwrites its previous rows instead of duplicating them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde_json::{Map, Value};

use crate::error::{ConfigurationError, StoreError};
use crate::semantic::{
    SemanticModelConfig, cosine_distance, decode_embedding_blob, encode_embedding_blob,
    resolve_model_config,
};
use crate::util::{now_utc_string, retry_with_backoff};

pub const STORE_SCHEMA_VERSION: &str = "1.0.0";
const UPSERT_MAX_ATTEMPTS: u32 = 4;
const UPSERT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Equality predicates over stored metadata; every entry must match.
pub type MetadataFilter = BTreeMap<String, Value>;

pub fn chunk_id(source_file: &str, chunk_index: usize) -> String {
    format!("{source_file}_{chunk_index}")
}

#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub source_file: String,
    pub chunk_index: usize,
    pub chunk_type: String,
    pub section_type: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub distance: f64,
}

pub trait VectorStore: Send + Sync {
    fn upsert(&self, record: &ChunkRecord) -> Result<(), StoreError>;

    /// Removes records of `source_file` with `chunk_index >= keep`.
    fn prune_source(&self, source_file: &str, keep: usize) -> Result<usize, StoreError>;

    /// Nearest records by cosine distance, closest first.
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<StoredMatch>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

/// Parses repeated `key=value` arguments. `true`/`false` become booleans and
/// integers become numbers; everything else stays a string.
pub fn parse_filters(raw: &[String]) -> Result<MetadataFilter, ConfigurationError> {
    let mut filter = MetadataFilter::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(ConfigurationError::InvalidFilter(entry.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigurationError::InvalidFilter(entry.clone()));
        }
        filter.insert(key.to_string(), parse_filter_value(value.trim()));
    }
    Ok(filter)
}

fn parse_filter_value(value: &str) -> Value {
    match value.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    value
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value))
}

pub fn matches_filter(metadata: &Map<String, Value>, filter: Option<&MetadataFilter>) -> bool {
    filter
        .map(|filter| {
            filter
                .iter()
                .all(|(key, expected)| metadata.get(key) == Some(expected))
        })
        .unwrap_or(true)
}

pub struct SqliteVectorStore {
    connection: Mutex<Connection>,
    model: SemanticModelConfig,
}

impl SqliteVectorStore {
    pub fn open(db_path: &Path, model: &SemanticModelConfig) -> Result<Self> {
        let connection = open_connection(db_path)?;
        Self::from_connection(connection, model)
    }

    /// Opens a store with the embedding model it was built with, or the
    /// default model when nothing has been stored yet.
    pub fn open_existing(db_path: &Path) -> Result<Self> {
        let connection = open_connection(db_path)?;
        ensure_schema(&connection)?;
        let model_id = stored_model_id(&connection)?.unwrap_or_default();
        Self::from_connection(connection, &resolve_model_config(&model_id))
    }

    pub fn open_in_memory(model: &SemanticModelConfig) -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::from_connection(connection, model)
    }

    fn from_connection(connection: Connection, model: &SemanticModelConfig) -> Result<Self> {
        ensure_schema(&connection)?;
        ensure_model(&connection, model)?;
        Ok(Self {
            connection: Mutex::new(connection),
            model: model.clone(),
        })
    }

    pub fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    /// Stored record count per source file.
    pub fn sources(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT source_file, COUNT(*) FROM chunk_records GROUP BY source_file ORDER BY source_file",
        )?;
        let mut rows = statement.query([])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            out.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize);
        }
        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert(&self, record: &ChunkRecord) -> Result<(), StoreError> {
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let embedding_blob = encode_embedding_blob(&record.embedding);
        let connection = self.lock()?;

        retry_with_backoff(UPSERT_MAX_ATTEMPTS, UPSERT_BASE_DELAY, is_transient, || {
            connection.execute(
                "
                INSERT INTO chunk_records(
                  id, source_file, chunk_index, chunk_type, section_type, content,
                  metadata_json, embedding, embedding_dim, model_id, created_at
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                  source_file=excluded.source_file,
                  chunk_index=excluded.chunk_index,
                  chunk_type=excluded.chunk_type,
                  section_type=excluded.section_type,
                  content=excluded.content,
                  metadata_json=excluded.metadata_json,
                  embedding=excluded.embedding,
                  embedding_dim=excluded.embedding_dim,
                  model_id=excluded.model_id,
                  created_at=excluded.created_at
                ",
                params![
                    record.id,
                    record.source_file,
                    record.chunk_index as i64,
                    record.chunk_type,
                    record.section_type,
                    record.content,
                    metadata_json,
                    embedding_blob,
                    record.embedding.len() as i64,
                    self.model.model_id,
                    record.created_at,
                ],
            )
        })
        .map(|_| ())
        .map_err(|(attempts, source)| {
            if attempts > 1 {
                StoreError::RetriesExhausted {
                    id: record.id.clone(),
                    attempts,
                    source,
                }
            } else {
                StoreError::Sqlite(source)
            }
        })
    }

    fn prune_source(&self, source_file: &str, keep: usize) -> Result<usize, StoreError> {
        let connection = self.lock()?;
        let removed = connection.execute(
            "DELETE FROM chunk_records WHERE source_file = ?1 AND chunk_index >= ?2",
            params![source_file, keep as i64],
        )?;
        Ok(removed)
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<StoredMatch>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "
            SELECT id, content, metadata_json, embedding, embedding_dim
            FROM chunk_records
            WHERE model_id = ?1
            ",
        )?;
        let mut rows = statement.query(params![self.model.model_id])?;

        let mut out = Vec::<StoredMatch>::new();
        while let Some(row) = rows.next()? {
            let embedding_dim = row.get::<_, i64>(4)? as usize;
            if embedding_dim != vector.len() {
                continue;
            }
            let blob = row.get::<_, Vec<u8>>(3)?;
            let Some(embedding) = decode_embedding_blob(&blob, embedding_dim) else {
                continue;
            };

            let metadata = serde_json::from_str::<Map<String, Value>>(&row.get::<_, String>(2)?)?;
            if !matches_filter(&metadata, filter) {
                continue;
            }

            out.push(StoredMatch {
                id: row.get(0)?,
                content: row.get(1)?,
                metadata,
                distance: cosine_distance(vector, &embedding),
            });
        }

        out.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then_with(|| left.id.cmp(&right.id))
        });
        out.truncate(top_k);
        Ok(out)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let connection = self.lock()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM chunk_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS store_metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunk_records (
              id TEXT PRIMARY KEY,
              source_file TEXT NOT NULL,
              chunk_index INTEGER NOT NULL,
              chunk_type TEXT NOT NULL,
              section_type TEXT NOT NULL,
              content TEXT NOT NULL,
              metadata_json TEXT NOT NULL,
              embedding BLOB NOT NULL,
              embedding_dim INTEGER NOT NULL,
              model_id TEXT NOT NULL,
              created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunk_records_source
              ON chunk_records(source_file, chunk_index);
            CREATE INDEX IF NOT EXISTS idx_chunk_records_model
              ON chunk_records(model_id);
            ",
        )
        .context("failed to initialize vector store schema")?;

    connection.execute(
        "INSERT INTO store_metadata(key, value) VALUES('store_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [STORE_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO store_metadata(key, value) VALUES('store_opened_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;

    Ok(())
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    Ok(connection)
}

fn stored_model_id(connection: &Connection) -> Result<Option<String>> {
    let stored = connection
        .query_row(
            "SELECT value FROM store_metadata WHERE key = 'embedding_model_id'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .context("failed to read stored embedding model id")?;
    Ok(stored)
}

fn ensure_model(connection: &Connection, model: &SemanticModelConfig) -> Result<()> {
    match stored_model_id(connection)? {
        Some(stored) if stored != model.model_id => Err(ConfigurationError::ModelMismatch {
            stored,
            requested: model.model_id.clone(),
        }
        .into()),
        Some(_) => Ok(()),
        None => {
            let config_json = serde_json::to_string(model)?;
            connection.execute(
                "INSERT INTO store_metadata(key, value) VALUES('embedding_model_id', ?1)",
                [&model.model_id],
            )?;
            connection.execute(
                "INSERT INTO store_metadata(key, value) VALUES('embedding_model_config', ?1)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                [config_json],
            )?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{embed_text_local, resolve_model_config};

    fn model() -> SemanticModelConfig {
        resolve_model_config("")
    }

    fn record(source: &str, index: usize, section: &str, content: &str) -> ChunkRecord {
        let mut metadata = Map::new();
        metadata.insert("source_file".to_string(), Value::from(source));
        metadata.insert("chunk_index".to_string(), Value::from(index));
        metadata.insert("section_type".to_string(), Value::from(section));
        ChunkRecord {
            id: chunk_id(source, index),
            source_file: source.to_string(),
            chunk_index: index,
            chunk_type: "text".to_string(),
            section_type: section.to_string(),
            content: content.to_string(),
            metadata,
            embedding: embed_text_local(content, model().dimensions),
            created_at: now_utc_string(),
        }
    }

    fn seeded_store() -> SqliteVectorStore {
        let store = SqliteVectorStore::open_in_memory(&model()).unwrap();
        store
            .upsert(&record("a.pdf", 0, "coverage", "hospital room coverage limits"))
            .unwrap();
        store
            .upsert(&record("a.pdf", 1, "exclusion", "cosmetic surgery is excluded"))
            .unwrap();
        store
            .upsert(&record("b.pdf", 0, "premium", "premium payable every month"))
            .unwrap();
        store
    }

    #[test]
    fn empty_store_returns_no_matches() {
        let store = SqliteVectorStore::open_in_memory(&model()).unwrap();
        let vector = embed_text_local("anything", model().dimensions);
        assert!(store.query(&vector, 5, None).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn query_orders_by_cosine_distance() {
        let store = seeded_store();
        let vector = embed_text_local("cosmetic surgery is excluded", model().dimensions);

        let matches = store.query(&vector, 2, None).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "a.pdf_1");
        assert!(matches[0].distance.abs() < 1e-6);
        assert!(matches[0].distance <= matches[1].distance);
    }

    #[test]
    fn filter_restricts_to_matching_metadata() {
        let store = seeded_store();
        let vector = embed_text_local("hospital room coverage limits", model().dimensions);
        let filter = MetadataFilter::from([(
            "section_type".to_string(),
            Value::from("exclusion"),
        )]);

        let matches = store.query(&vector, 10, Some(&filter)).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(
            matches
                .iter()
                .all(|found| found.metadata["section_type"] == "exclusion")
        );
    }

    #[test]
    fn upsert_with_same_id_overwrites() {
        let store = seeded_store();
        store
            .upsert(&record("a.pdf", 0, "coverage", "updated coverage text"))
            .unwrap();

        assert_eq!(store.count().unwrap(), 3);
        let vector = embed_text_local("updated coverage text", model().dimensions);
        let matches = store.query(&vector, 1, None).unwrap();
        assert_eq!(matches[0].content, "updated coverage text");
    }

    #[test]
    fn prune_removes_stale_indices_of_one_source() {
        let store = seeded_store();
        assert_eq!(store.prune_source("a.pdf", 1).unwrap(), 1);
        assert_eq!(
            store.sources().unwrap(),
            BTreeMap::from([("a.pdf".to_string(), 1), ("b.pdf".to_string(), 1)])
        );
    }

    #[test]
    fn reopening_with_another_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.sqlite");
        SqliteVectorStore::open(&db_path, &model()).unwrap();

        let err = SqliteVectorStore::open(&db_path, &resolve_model_config("other-model"))
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn filter_arguments_are_typed() {
        let filter = parse_filters(&[
            "section_type=exclusion".to_string(),
            "has_legal_terms=True".to_string(),
            "chunk_index=4".to_string(),
            "source_file=plan=a.pdf".to_string(),
        ])
        .unwrap();

        assert_eq!(filter["section_type"], Value::from("exclusion"));
        assert_eq!(filter["has_legal_terms"], Value::Bool(true));
        assert_eq!(filter["chunk_index"], Value::from(4));
        assert_eq!(filter["source_file"], Value::from("plan=a.pdf"));

        assert!(matches!(
            parse_filters(&["section_type".to_string()]),
            Err(ConfigurationError::InvalidFilter(_))
        ));
        assert!(parse_filters(&["=x".to_string()]).is_err());
    }

    #[test]
    fn filter_matching_requires_every_key() {
        let mut metadata = Map::new();
        metadata.insert("chunk_type".to_string(), Value::from("table"));
        metadata.insert("has_table_data".to_string(), Value::from(true));

        let both = MetadataFilter::from([
            ("chunk_type".to_string(), Value::from("table")),
            ("has_table_data".to_string(), Value::from(true)),
        ]);
        let mismatched = MetadataFilter::from([
            ("chunk_type".to_string(), Value::from("table")),
            ("has_table_data".to_string(), Value::from(false)),
        ]);

        assert!(matches_filter(&metadata, None));
        assert!(matches_filter(&metadata, Some(&both)));
        assert!(!matches_filter(&metadata, Some(&mismatched)));
    }
}
