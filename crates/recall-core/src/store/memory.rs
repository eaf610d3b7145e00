//! In-memory [`VectorStore`] implementation for testing and WASM targets.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. Both queries are
//! brute force over every stored record.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::{cosine_similarity, sparse_dot};
use crate::error::StoreError;
use crate::models::{Chunk, IndexedRecord, SparseVector};

use super::{rank_and_truncate, ScoredChunk, SearchFilters, VectorStore};

/// In-memory store for testing and WASM environments.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, IndexedRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored chunk by id.
    pub fn get(&self, chunk_id: &str) -> Option<Chunk> {
        self.records
            .read()
            .ok()?
            .get(chunk_id)
            .map(|r| r.chunk.clone())
    }

    /// Every stored chunk id, sorted.
    pub fn chunk_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn scan<F>(&self, filters: &SearchFilters, k: usize, score: F) -> Result<Vec<ScoredChunk>, StoreError>
    where
        F: Fn(&IndexedRecord) -> f64,
    {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Read("lock poisoned".to_string()))?;
        let hits = records
            .values()
            .filter(|r| filters.matches(&r.chunk))
            .filter_map(|r| {
                let s = score(r);
                (s > 0.0).then(|| ScoredChunk {
                    chunk: r.chunk.clone(),
                    score: s,
                })
            })
            .collect();
        Ok(rank_and_truncate(hits, k))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let mut stored = self
            .records
            .write()
            .map_err(|_| StoreError::Write("lock poisoned".to_string()))?;
        for r in records {
            stored.insert(r.chunk.chunk_id.clone(), r.clone());
        }
        Ok(())
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        let mut stored = self
            .records
            .write()
            .map_err(|_| StoreError::Write("lock poisoned".to_string()))?;
        for id in chunk_ids {
            stored.remove(id);
        }
        Ok(())
    }

    async fn query_dense(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.scan(filters, k, |r| cosine_similarity(vector, &r.dense) as f64)
    }

    async fn query_sparse(
        &self,
        vector: &SparseVector,
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if vector.is_empty() {
            return Ok(Vec::new());
        }
        self.scan(filters, k, |r| sparse_dot(vector, &r.sparse) as f64)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let stored = self
            .records
            .read()
            .map_err(|_| StoreError::Read("lock poisoned".to_string()))?;
        Ok(stored.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{sparse_encode, HashEmbedder};
    use crate::models::Tags;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, source: &str, text: &str) -> IndexedRecord {
        let e = HashEmbedder::new(256);
        IndexedRecord {
            chunk: Chunk {
                chunk_id: id.to_string(),
                source_id: source.to_string(),
                parent_external_id: id.to_string(),
                chunk_index: 0,
                total_chunks: 1,
                text: text.to_string(),
                char_range: 0..text.len(),
                hash: String::new(),
                tags: Tags::default(),
                occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
            dense: e.embed_text(text),
            sparse: sparse_encode(text),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryStore::new();
        store.upsert(&[record("a", "s", "first")]).await.unwrap();
        store.upsert(&[record("a", "s", "second")]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("a").unwrap().text, "second");
    }

    #[tokio::test]
    async fn test_delete_ignores_unknown() {
        let store = InMemoryStore::new();
        store
            .upsert(&[record("a", "s", "x"), record("b", "s", "y")])
            .await
            .unwrap();
        store
            .delete(&["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(store.chunk_ids(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_queries_filter_before_truncation() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                record("m1", "mail", "kafka consumer lag"),
                record("m2", "mail", "kafka consumer lag again"),
                record("c1", "chat", "kafka lag in chat"),
            ])
            .await
            .unwrap();

        let filters = SearchFilters {
            source_id: Some("chat".to_string()),
            ..Default::default()
        };
        let q = sparse_encode("kafka consumer lag");
        let hits = store.query_sparse(&q, &filters, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk_id, "c1");

        let dense = HashEmbedder::new(256).embed_text("kafka consumer lag");
        let hits = store.query_dense(&dense, &filters, 1).await.unwrap();
        assert_eq!(hits[0].chunk.chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_sparse_query_skips_non_matching() {
        let store = InMemoryStore::new();
        store
            .upsert(&[record("a", "s", "alpha beta"), record("b", "s", "gamma")])
            .await
            .unwrap();
        let hits = store
            .query_sparse(&sparse_encode("alpha"), &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk_id, "a");
        assert!(store
            .query_sparse(&SparseVector::default(), &SearchFilters::default(), 10)
            .await
            .unwrap()
            .is_empty());
    }
}
