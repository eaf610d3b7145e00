//! Sync orchestration.
//!
//! A pass over one source runs:
//!
//! ```text
//! plan_sync → page loop { deletions → validate → chunk + tag → embed → upsert }
//!           → reconcile live ids → commit cursor
//! ```
//!
//! - Only one pass per source runs at a time; a second concurrent pass is
//!   rejected with [`SyncError::SourceBusy`].
//! - Chunking and tagging run on the blocking pool, `prepare_workers`
//!   documents at a time.
//! - Embedding batches never split a document and run `embedding.concurrency`
//!   at a time. A batch that exhausts its retries marks its documents
//!   failed; the pass continues but does not commit its cursor.
//! - Source and store errors abort the pass with the cursor untouched.
//!   Re-running is safe because upserts are idempotent.

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::Instrument;
use uuid::Uuid;

use recall_core::chunk::{chunk_document, ChunkerConfig};
use recall_core::cursor::ChangeTracker;
use recall_core::embedding::Embedder;
use recall_core::error::{SourceError, SyncError};
use recall_core::index::Indexer;
use recall_core::models::{Chunk, IndexedRecord, RawDocument, SyncMode, SyncPlan, SyncReport};
use recall_core::source::{SourceAdapter, SourcePage};
use recall_core::tag::{tag_chunks, TagConfig};

use crate::config::Config;
use crate::embedding::{create_embedder, embed_with_retry};
use crate::sources::build_adapters;
use crate::sqlite_store::SqliteStore;
use crate::state::SqliteStateStore;

/// Tuning knobs for a [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub chunker: ChunkerConfig,
    pub tagger: TagConfig,
    /// Maximum chunks per embedding request (a larger document is sent alone).
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub embed_concurrency: usize,
    pub prepare_workers: usize,
    pub max_parallel_sources: usize,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunker: config.chunking.chunker(),
            tagger: config.tagging.tagger(),
            batch_size: config.embedding.batch_size,
            max_retries: config.embedding.max_retries,
            retry_base_ms: config.embedding.retry_base_ms,
            embed_concurrency: config.embedding.concurrency,
            prepare_workers: config.sync.prepare_workers,
            max_parallel_sources: config.sync.max_parallel_sources,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::new(2000, 200),
            tagger: TagConfig::default(),
            batch_size: 64,
            max_retries: 5,
            retry_base_ms: 1000,
            embed_concurrency: 2,
            prepare_workers: 4,
            max_parallel_sources: 4,
        }
    }
}

/// A document after chunking and tagging.
struct Prepared {
    external_id: String,
    chunks: Vec<Chunk>,
}

pub struct SyncEngine {
    tracker: ChangeTracker,
    indexer: Indexer,
    embedder: Arc<dyn Embedder>,
    settings: SyncSettings,
    running: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(
        tracker: ChangeTracker,
        indexer: Indexer,
        embedder: Arc<dyn Embedder>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            tracker,
            indexer,
            embedder,
            settings,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn source_lock(&self, source_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, SyncError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| SyncError::Worker("sync lock table poisoned".to_string()))?;
        Ok(Arc::clone(running.entry(source_id.to_string()).or_default()))
    }

    /// Run one pass over `adapter`.
    ///
    /// With `force_full`, the stored cursor is ignored and the source is
    /// re-listed over the lookback window.
    pub async fn sync_source(
        &self,
        adapter: &dyn SourceAdapter,
        force_full: bool,
    ) -> Result<SyncReport, SyncError> {
        let source_id = adapter.source_id().to_string();
        let _guard = self
            .source_lock(&source_id)?
            .try_lock_owned()
            .map_err(|_| SyncError::SourceBusy(source_id.clone()))?;

        let span = tracing::info_span!("sync", source = %source_id, run = %Uuid::new_v4());
        self.run_pass(adapter, force_full).instrument(span).await
    }

    /// Sync every adapter, `max_parallel_sources` at a time.
    ///
    /// Results are returned in source id order; one source failing does
    /// not stop the others.
    pub async fn sync_all(
        &self,
        adapters: &[Arc<dyn SourceAdapter>],
        force_full: bool,
    ) -> Vec<(String, Result<SyncReport, SyncError>)> {
        let mut results: Vec<_> = stream::iter(adapters)
            .map(|adapter| async move {
                let id = adapter.source_id().to_string();
                (id, self.sync_source(adapter.as_ref(), force_full).await)
            })
            .buffer_unordered(self.settings.max_parallel_sources.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    async fn run_pass(&self, adapter: &dyn SourceAdapter, force_full: bool) -> Result<SyncReport, SyncError> {
        let source_id = adapter.source_id();
        let plan = if force_full {
            SyncPlan {
                source_id: source_id.to_string(),
                mode: SyncMode::Full,
                cursor_in: None,
                since: Some(chrono::Utc::now() - self.tracker.lookback()),
            }
        } else {
            self.tracker.plan_sync(source_id).await?
        };
        tracing::info!(mode = %plan.mode, cursor = ?plan.cursor_in, "sync pass started");

        let mut report = SyncReport::new(source_id, plan.mode);
        let mut page_token: Option<String> = None;
        let mut manifest: Option<BTreeSet<String>> = Some(BTreeSet::new());

        let cursor_out = loop {
            let page = match self.fetch(adapter, &plan, page_token.as_deref()).await {
                Ok(page) => page,
                Err(SourceError::CursorExpired { source_id }) => {
                    tracing::warn!("cursor expired; next pass will be a full sync");
                    self.tracker.mark_expired(&source_id).await?;
                    return Err(SyncError::CursorExpired { source_id });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "source error; cursor left untouched");
                    return Err(e.into());
                }
            };

            for rejected in &page.rejected {
                tracing::warn!(document = %rejected.external_id, reason = %rejected.reason, "skipping malformed document");
                report.skipped += 1;
            }

            for external_id in &page.deleted {
                if self.indexer.remove_document(source_id, external_id).await? {
                    report.deleted += 1;
                }
            }

            manifest = match (manifest.take(), page.live_ids) {
                (Some(mut live), Some(ids)) => {
                    live.extend(ids);
                    Some(live)
                }
                _ => None,
            };

            self.index_documents(source_id, page.documents, &mut report).await?;

            page_token = page.next_page_token;
            if page_token.is_none() {
                break page.cursor;
            }
        };

        if let Some(live) = manifest {
            report.deleted += self.indexer.reconcile(source_id, &live).await?;
        }

        if report.failed == 0 {
            self.tracker.commit_sync(source_id, &cursor_out, plan.mode).await?;
            report.cursor_committed = true;
        } else {
            tracing::warn!(failed = report.failed, "embedding failures; cursor not committed");
        }

        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            deleted = report.deleted,
            chunks = report.chunks_written,
            committed = report.cursor_committed,
            "sync pass finished"
        );
        Ok(report)
    }

    async fn fetch(
        &self,
        adapter: &dyn SourceAdapter,
        plan: &SyncPlan,
        page_token: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        let page = match (plan.mode, plan.cursor_in.as_deref()) {
            (SyncMode::Incremental, Some(cursor)) => adapter.list_since(cursor, page_token).await?,
            _ => adapter.list_full(plan.since, page_token).await?,
        };
        tracing::debug!(
            documents = page.documents.len(),
            deleted = page.deleted.len(),
            last = page.is_last(),
            "fetched page"
        );
        Ok(page)
    }

    async fn index_documents(
        &self,
        source_id: &str,
        documents: Vec<RawDocument>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let mut valid = Vec::with_capacity(documents.len());
        for doc in documents {
            match doc.validate() {
                Ok(()) => valid.push(doc),
                Err(e) => {
                    tracing::warn!(document = %e.external_id, reason = %e.reason, "skipping malformed document");
                    report.skipped += 1;
                }
            }
        }

        let prepared = self.prepare(valid).await?;

        let mut pending = Vec::new();
        for doc in prepared {
            if doc.chunks.is_empty() {
                // Nothing left to embed; drop whatever the document used to own.
                self.indexer.upsert_document(source_id, &doc.external_id, &[]).await?;
                report.processed += 1;
            } else {
                pending.push(doc);
            }
        }

        let batches = batch_documents(pending, self.settings.batch_size);
        let embedder = &*self.embedder;
        let settings = &self.settings;
        let mut embedded = stream::iter(batches)
            .map(|batch| async move {
                let texts: Vec<String> = batch
                    .iter()
                    .flat_map(|d| d.chunks.iter().map(|c| c.text.clone()))
                    .collect();
                let result =
                    embed_with_retry(embedder, &texts, settings.max_retries, settings.retry_base_ms).await;
                (batch, result)
            })
            .buffered(settings.embed_concurrency.max(1));

        while let Some((batch, result)) = embedded.next().await {
            let embeddings = match result {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    tracing::warn!(documents = batch.len(), error = %e, "embedding batch failed");
                    report.failed += batch.len() as u64;
                    continue;
                }
            };

            let mut vectors = embeddings.into_iter();
            for doc in batch {
                let records: Vec<IndexedRecord> = doc
                    .chunks
                    .into_iter()
                    .zip(vectors.by_ref())
                    .map(|(chunk, e)| IndexedRecord {
                        chunk,
                        dense: e.dense,
                        sparse: e.sparse,
                    })
                    .collect();
                self.indexer
                    .upsert_document(source_id, &doc.external_id, &records)
                    .await?;
                report.processed += 1;
                report.chunks_written += records.len() as u64;
            }
        }
        Ok(())
    }

    /// Chunk and tag documents on the blocking pool, preserving order.
    async fn prepare(&self, documents: Vec<RawDocument>) -> Result<Vec<Prepared>, SyncError> {
        let chunker = self.settings.chunker;
        let tagger = self.settings.tagger;
        stream::iter(documents)
            .map(|doc| {
                tokio::task::spawn_blocking(move || {
                    let mut chunks = chunk_document(&doc, &chunker);
                    tag_chunks(&mut chunks, &tagger);
                    Prepared {
                        external_id: doc.external_id,
                        chunks,
                    }
                })
            })
            .buffered(self.settings.prepare_workers.max(1))
            .map(|joined| joined.map_err(|e| SyncError::Worker(e.to_string())))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }
}

/// Group documents so each batch holds at most `max_chunks` chunks, except
/// that a document is never split across batches.
fn batch_documents(docs: Vec<Prepared>, max_chunks: usize) -> Vec<Vec<Prepared>> {
    let mut batches = Vec::new();
    let mut current: Vec<Prepared> = Vec::new();
    let mut size = 0;
    for doc in docs {
        let n = doc.chunks.len();
        if !current.is_empty() && size + n > max_chunks {
            batches.push(std::mem::take(&mut current));
            size = 0;
        }
        size += n;
        current.push(doc);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Build a [`SyncEngine`] backed by the configured SQLite database.
pub async fn open_engine(config: &Config) -> Result<SyncEngine> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::migrate_pool(&pool).await?;
    let state = Arc::new(SqliteStateStore::new(pool.clone()));
    let store = Arc::new(SqliteStore::new(pool));

    let tracker = ChangeTracker::with_lookback(state.clone(), chrono::Duration::days(config.sync.lookback_days));
    let indexer = Indexer::new(store, state);
    let embedder = create_embedder(&config.embedding)?;
    Ok(SyncEngine::new(tracker, indexer, embedder, SyncSettings::from_config(config)))
}

/// `rcl sync <all|source>`: run the passes and print a summary per source.
pub async fn run_sync(config: &Config, target: &str, full: bool) -> Result<()> {
    let adapters = build_adapters(config)?;
    let selected: Vec<Arc<dyn SourceAdapter>> = if target == "all" {
        adapters
    } else {
        let wanted = if target.contains(':') {
            target.to_string()
        } else {
            format!("dir:{}", target)
        };
        let found: Vec<_> = adapters.into_iter().filter(|a| a.source_id() == wanted).collect();
        if found.is_empty() {
            bail!(
                "Unknown source: '{}'. Configured: {}",
                target,
                config.source_ids().join(", ")
            );
        }
        found
    };

    if selected.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    let engine = open_engine(config).await.context("Failed to open index")?;
    let results = engine.sync_all(&selected, full).await;

    let mut errors = 0;
    for (source_id, result) in &results {
        match result {
            Ok(r) => {
                println!("sync {} ({})", source_id, r.mode);
                println!("  processed: {}", r.processed);
                println!("  skipped: {}", r.skipped);
                println!("  failed: {}", r.failed);
                println!("  deleted: {}", r.deleted);
                println!("  chunks written: {}", r.chunks_written);
                println!(
                    "  cursor: {}",
                    if r.cursor_committed { "committed" } else { "not committed" }
                );
            }
            Err(e) => {
                errors += 1;
                println!("sync {}", source_id);
                println!("  error: {}", e);
            }
        }
    }

    if errors > 0 {
        bail!("{} of {} sources failed to sync", errors, results.len());
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(id: &str, chunks: usize) -> Prepared {
        let doc = RawDocument {
            source_id: "s".to_string(),
            external_id: id.to_string(),
            raw_text: "x".repeat(10),
            occurred_at: chrono::Utc::now(),
            provenance: serde_json::Value::Null,
        };
        let one = chunk_document(&doc, &ChunkerConfig::new(100, 0));
        Prepared {
            external_id: id.to_string(),
            chunks: std::iter::repeat(one[0].clone()).take(chunks).collect(),
        }
    }

    #[test]
    fn test_batches_never_split_documents() {
        let docs = vec![prepared("a", 2), prepared("b", 2), prepared("c", 5), prepared("d", 1)];
        let batches = batch_documents(docs, 4);
        let shape: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.iter().map(|d| d.external_id.as_str()).collect())
            .collect();
        assert_eq!(shape, vec![vec!["a", "b"], vec!["c"], vec!["d"]]);
    }

    #[test]
    fn test_empty_batch_list() {
        assert!(batch_documents(Vec::new(), 4).is_empty());
    }
}
