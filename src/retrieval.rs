use std::sync::Arc;

use tracing::debug;

use crate::error::RetrievalError;
use crate::model::RetrievalResult;
use crate::semantic::{Embedder, validate_embedding};
use crate::store::{MetadataFilter, VectorStore};

/// Question in, ranked passages out. The embedder must be the one the corpus
/// was indexed with.
pub struct RetrievalFacade {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl RetrievalFacade {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Results come back in store order with `similarity_score = 1 - distance`
    /// and 1-based ranks. An empty filter means an unrestricted search.
    pub fn query(
        &self,
        question: &str,
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let vector = self.embedder.embed(question)?;
        validate_embedding(&vector, self.embedder.model().dimensions)?;

        let filter = (!filter.is_empty()).then_some(filter);
        let matches = self.store.query(&vector, top_k, filter)?;
        debug!(top_k, matches = matches.len(), "vector store answered");

        Ok(matches
            .into_iter()
            .enumerate()
            .map(|(index, found)| RetrievalResult {
                content: found.content,
                metadata: found.metadata,
                similarity_score: 1.0 - found.distance,
                rank: index + 1,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};

    use super::*;
    use crate::error::StoreError;
    use crate::semantic::{LocalHashEmbedder, resolve_model_config};
    use crate::store::{ChunkRecord, SqliteVectorStore, StoredMatch};

    /// Returns fixed matches regardless of the query vector.
    struct CannedStore {
        matches: Vec<StoredMatch>,
    }

    impl VectorStore for CannedStore {
        fn upsert(&self, _record: &ChunkRecord) -> Result<(), StoreError> {
            Ok(())
        }

        fn prune_source(&self, _source_file: &str, _keep: usize) -> Result<usize, StoreError> {
            Ok(0)
        }

        fn query(
            &self,
            _vector: &[f32],
            top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<StoredMatch>, StoreError> {
            Ok(self.matches.iter().take(top_k).cloned().collect())
        }

        fn count(&self) -> Result<usize, StoreError> {
            Ok(self.matches.len())
        }
    }

    struct BrokenStore;

    impl VectorStore for BrokenStore {
        fn upsert(&self, _record: &ChunkRecord) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }

        fn prune_source(&self, _source_file: &str, _keep: usize) -> Result<usize, StoreError> {
            Err(StoreError::Poisoned)
        }

        fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<StoredMatch>, StoreError> {
            Err(StoreError::Poisoned)
        }

        fn count(&self) -> Result<usize, StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(LocalHashEmbedder::new(resolve_model_config("")))
    }

    fn canned(id: &str, distance: f64) -> StoredMatch {
        let mut metadata = Map::new();
        metadata.insert("section_type".to_string(), Value::from("coverage"));
        StoredMatch {
            id: id.to_string(),
            content: format!("content of {id}"),
            metadata,
            distance,
        }
    }

    #[test]
    fn distance_converts_to_similarity_with_one_based_rank() {
        let store = CannedStore {
            matches: vec![canned("a.pdf_0", 0.2), canned("a.pdf_1", 0.5)],
        };
        let facade = RetrievalFacade::new(embedder(), Arc::new(store));

        let results = facade
            .query("what is covered?", 5, &MetadataFilter::new())
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!((results[0].similarity_score - 0.8).abs() < 1e-12);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        assert_eq!(results[1].content, "content of a.pdf_1");
        assert_eq!(results[0].metadata_str("section_type"), "coverage");
    }

    #[test]
    fn empty_corpus_returns_no_results() {
        let store = SqliteVectorStore::open_in_memory(&resolve_model_config("")).unwrap();
        let facade = RetrievalFacade::new(embedder(), Arc::new(store));

        let results = facade
            .query("grace period", 5, &MetadataFilter::new())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn store_failure_is_not_an_empty_result() {
        let facade = RetrievalFacade::new(embedder(), Arc::new(BrokenStore));
        let err = facade
            .query("deductible", 3, &MetadataFilter::new())
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Store(StoreError::Poisoned)));
    }
}
