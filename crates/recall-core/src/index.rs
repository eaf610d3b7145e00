//! Idempotent indexing.
//!
//! The [`Indexer`] writes a document's chunks to the [`VectorStore`] and
//! keeps a [`ChunkLedger`] of which chunk ids each document currently owns.
//! The ledger is what makes re-indexing exact: when a document shrinks from
//! five chunks to three, the two trailing ids are deleted, and when a
//! document disappears upstream all of its ids go with it.
//!
//! Writes happen in this order so a failure at any step leaves the index
//! readable and the next pass converges:
//!
//! 1. widen the ledger to the union of the old and new id sets
//! 2. upsert every new record in one atomic batch
//! 3. delete ids the document no longer produces
//! 4. narrow the ledger to the new id set
//!
//! The ledger therefore never holds fewer ids than the store does for a
//! document, and every chunk written stays reachable for later deletion.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{StateError, SyncError};
use crate::models::IndexedRecord;
use crate::store::VectorStore;

/// Per-document chunk id bookkeeping.
#[async_trait]
pub trait ChunkLedger: Send + Sync {
    async fn chunk_ids(&self, source_id: &str, external_id: &str) -> Result<Vec<String>, StateError>;

    /// Replace the document's id set.
    async fn record(
        &self,
        source_id: &str,
        external_id: &str,
        chunk_ids: &[String],
    ) -> Result<(), StateError>;

    async fn forget(&self, source_id: &str, external_id: &str) -> Result<(), StateError>;

    /// External ids of every indexed document of `source_id`, sorted.
    async fn documents(&self, source_id: &str) -> Result<Vec<String>, StateError>;
}

#[derive(Default)]
pub struct InMemoryLedger {
    rows: RwLock<HashMap<(String, String), Vec<String>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StateError {
    StateError("ledger lock poisoned".to_string())
}

#[async_trait]
impl ChunkLedger for InMemoryLedger {
    async fn chunk_ids(&self, source_id: &str, external_id: &str) -> Result<Vec<String>, StateError> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .get(&(source_id.to_string(), external_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn record(
        &self,
        source_id: &str,
        external_id: &str,
        chunk_ids: &[String],
    ) -> Result<(), StateError> {
        self.rows
            .write()
            .map_err(poisoned)?
            .insert((source_id.to_string(), external_id.to_string()), chunk_ids.to_vec());
        Ok(())
    }

    async fn forget(&self, source_id: &str, external_id: &str) -> Result<(), StateError> {
        self.rows
            .write()
            .map_err(poisoned)?
            .remove(&(source_id.to_string(), external_id.to_string()));
        Ok(())
    }

    async fn documents(&self, source_id: &str) -> Result<Vec<String>, StateError> {
        let rows = self.rows.read().map_err(poisoned)?;
        let mut docs: Vec<String> = rows
            .keys()
            .filter(|(s, _)| s == source_id)
            .map(|(_, e)| e.clone())
            .collect();
        docs.sort();
        Ok(docs)
    }
}

/// Writes documents to the store and keeps the ledger in step.
#[derive(Clone)]
pub struct Indexer {
    store: Arc<dyn VectorStore>,
    ledger: Arc<dyn ChunkLedger>,
}

impl Indexer {
    pub fn new(store: Arc<dyn VectorStore>, ledger: Arc<dyn ChunkLedger>) -> Self {
        Self { store, ledger }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Index every chunk of one document, replacing its previous chunks.
    ///
    /// `records` must all belong to the same `(source_id, external_id)`.
    /// Returns the number of stale chunks removed.
    pub async fn upsert_document(
        &self,
        source_id: &str,
        external_id: &str,
        records: &[IndexedRecord],
    ) -> Result<usize, SyncError> {
        let previous = self.ledger.chunk_ids(source_id, external_id).await?;
        let current: Vec<String> = records.iter().map(|r| r.chunk.chunk_id.clone()).collect();

        let known: BTreeSet<&String> = previous.iter().collect();
        let added: Vec<&String> = current.iter().filter(|id| !known.contains(id)).collect();
        if !added.is_empty() {
            let mut widened = previous.clone();
            widened.extend(added.into_iter().cloned());
            self.ledger.record(source_id, external_id, &widened).await?;
        }

        if !records.is_empty() {
            self.store.upsert(records).await?;
        }

        let keep: BTreeSet<&String> = current.iter().collect();
        let stale: Vec<String> = previous.into_iter().filter(|id| !keep.contains(id)).collect();
        if !stale.is_empty() {
            self.store.delete(&stale).await?;
            tracing::debug!(
                source = source_id,
                document = external_id,
                removed = stale.len(),
                "removed stale chunks"
            );
        }

        if current.is_empty() {
            self.ledger.forget(source_id, external_id).await?;
        } else {
            self.ledger.record(source_id, external_id, &current).await?;
        }
        Ok(stale.len())
    }

    /// Remove every chunk of a document. Returns whether it was indexed.
    pub async fn remove_document(&self, source_id: &str, external_id: &str) -> Result<bool, SyncError> {
        let ids = self.ledger.chunk_ids(source_id, external_id).await?;
        if ids.is_empty() {
            return Ok(false);
        }
        self.store.delete(&ids).await?;
        self.ledger.forget(source_id, external_id).await?;
        Ok(true)
    }

    /// Remove every indexed document of `source_id` that is not in
    /// `live_ids`. Returns the number of documents removed.
    pub async fn reconcile(&self, source_id: &str, live_ids: &BTreeSet<String>) -> Result<u64, SyncError> {
        let mut removed = 0;
        for external_id in self.ledger.documents(source_id).await? {
            if !live_ids.contains(&external_id) && self.remove_document(source_id, &external_id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(source = source_id, removed, "reconciled deleted documents");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_document, ChunkerConfig};
    use crate::embedding::{sparse_encode, HashEmbedder};
    use crate::models::RawDocument;
    use crate::store::memory::InMemoryStore;
    use chrono::{TimeZone, Utc};

    fn records_for(external_id: &str, body: &str) -> Vec<IndexedRecord> {
        let doc = RawDocument {
            source_id: "notes".to_string(),
            external_id: external_id.to_string(),
            raw_text: body.to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            provenance: serde_json::Value::Null,
        };
        let e = HashEmbedder::new(32);
        chunk_document(&doc, &ChunkerConfig::new(70, 0).with_tolerance(20))
            .into_iter()
            .map(|chunk| IndexedRecord {
                dense: e.embed_text(&chunk.text),
                sparse: sparse_encode(&chunk.text),
                chunk,
            })
            .collect()
    }

    fn body(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| format!("Paragraph {} talks about topic number {} in some detail here.", i, i))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn setup() -> (Arc<InMemoryStore>, Indexer) {
        let store = Arc::new(InMemoryStore::new());
        let indexer = Indexer::new(store.clone(), Arc::new(InMemoryLedger::new()));
        (store, indexer)
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let (store, indexer) = setup();
        let recs = records_for("d1", &body(5));
        indexer.upsert_document("notes", "d1", &recs).await.unwrap();
        let before = store.chunk_ids();
        indexer.upsert_document("notes", "d1", &recs).await.unwrap();
        assert_eq!(store.chunk_ids(), before);
        assert_eq!(store.count().await.unwrap() as usize, recs.len());
    }

    #[tokio::test]
    async fn test_shrinking_document_drops_trailing_chunks() {
        let (store, indexer) = setup();
        let long = records_for("d1", &body(5));
        let short = records_for("d1", &body(3));
        assert_eq!(long.len(), 5);
        assert_eq!(short.len(), 3);

        indexer.upsert_document("notes", "d1", &long).await.unwrap();
        let removed = indexer.upsert_document("notes", "d1", &short).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.unwrap(), 3);
        for r in &short {
            assert!(store.get(&r.chunk.chunk_id).is_some());
        }
    }

    /// Fails `record` once the store already holds every id being recorded,
    /// i.e. on the write that follows a successful upsert.
    struct FailAfterUpsertLedger {
        inner: InMemoryLedger,
        store: Arc<InMemoryStore>,
        armed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ChunkLedger for FailAfterUpsertLedger {
        async fn chunk_ids(&self, source_id: &str, external_id: &str) -> Result<Vec<String>, StateError> {
            self.inner.chunk_ids(source_id, external_id).await
        }

        async fn record(
            &self,
            source_id: &str,
            external_id: &str,
            chunk_ids: &[String],
        ) -> Result<(), StateError> {
            let stored = chunk_ids.iter().all(|id| self.store.get(id).is_some());
            if stored && self.armed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StateError("ledger unavailable".to_string()));
            }
            self.inner.record(source_id, external_id, chunk_ids).await
        }

        async fn forget(&self, source_id: &str, external_id: &str) -> Result<(), StateError> {
            self.inner.forget(source_id, external_id).await
        }

        async fn documents(&self, source_id: &str) -> Result<Vec<String>, StateError> {
            self.inner.documents(source_id).await
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_after_growth_leaves_no_orphans() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(FailAfterUpsertLedger {
            inner: InMemoryLedger::new(),
            store: store.clone(),
            armed: std::sync::atomic::AtomicBool::new(false),
        });
        let indexer = Indexer::new(store.clone(), ledger.clone());

        indexer.upsert_document("notes", "d1", &records_for("d1", &body(3))).await.unwrap();

        ledger.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let grown = records_for("d1", &body(5));
        assert!(indexer.upsert_document("notes", "d1", &grown).await.is_err());
        assert_eq!(store.count().await.unwrap(), 5);
        assert_eq!(ledger.chunk_ids("notes", "d1").await.unwrap().len(), 5);

        ledger.armed.store(false, std::sync::atomic::Ordering::SeqCst);
        let shrunk = records_for("d1", &body(2));
        assert_eq!(shrunk.len(), 2);
        let removed = indexer.upsert_document("notes", "d1", &shrunk).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_and_reconcile() {
        let (store, indexer) = setup();
        indexer
            .upsert_document("notes", "keep", &records_for("keep", &body(2)))
            .await
            .unwrap();
        indexer
            .upsert_document("notes", "gone", &records_for("gone", &body(2)))
            .await
            .unwrap();

        let live: BTreeSet<String> = ["keep".to_string()].into_iter().collect();
        assert_eq!(indexer.reconcile("notes", &live).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(!indexer.remove_document("notes", "gone").await.unwrap());
        assert!(indexer.remove_document("notes", "keep").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
