pub mod evaluate;
pub mod ingest;
pub mod inventory;
pub mod query;
pub mod stats;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::config::resolve_db_path;
use crate::semantic::{SemanticModelConfig, resolve_model_config};
use crate::store::SqliteVectorStore;
use crate::util::ensure_directory;

pub(crate) struct OpenedStore {
    pub store: SqliteVectorStore,
    pub model: SemanticModelConfig,
    pub db_path: PathBuf,
}

/// Opens (creating if needed) the vector store for `model_id`. Fails when the
/// store was built with a different embedding model.
pub(crate) fn open_store(
    cache_root: &Path,
    db_path: Option<&PathBuf>,
    model_id: &str,
) -> Result<OpenedStore> {
    let db_path = resolve_db_path(cache_root, db_path);
    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }

    let model = resolve_model_config(model_id);
    let store = SqliteVectorStore::open(&db_path, &model)?;
    debug!(path = %db_path.display(), model_id = %model.model_id, "opened vector store");

    Ok(OpenedStore {
        store,
        model,
        db_path,
    })
}
