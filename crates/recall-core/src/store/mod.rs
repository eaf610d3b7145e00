//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only seam between the pipeline and
//! persistence: the indexer writes through it and hybrid search reads
//! through it. Every record carries both a dense and a sparse vector so
//! one store serves both retrieval paths.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Chunk, IndexedRecord, Sentiment, SparseVector};

/// A chunk with a retrieval score, highest first in result lists.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Filter on a chunk's tags. String comparisons ignore ASCII case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TagFilter {
    Person(String),
    Project(String),
    Topic(String),
    Sentiment(Sentiment),
    HasDecision,
    HasActionItem,
}

impl TagFilter {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        let tags = &chunk.tags;
        match self {
            TagFilter::Person(p) => tags.people.iter().any(|x| x.eq_ignore_ascii_case(p)),
            TagFilter::Project(p) => tags.projects.iter().any(|x| x.eq_ignore_ascii_case(p)),
            TagFilter::Topic(t) => tags.topics.iter().any(|x| x.eq_ignore_ascii_case(t)),
            TagFilter::Sentiment(s) => tags.sentiment == *s,
            TagFilter::HasDecision => !tags.decisions.is_empty(),
            TagFilter::HasActionItem => !tags.action_items.is_empty(),
        }
    }
}

/// Restrictions applied before ranking and truncation.
///
/// All set fields must match. `since` and `until` bound the chunk's
/// `occurred_at`, both inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub source_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagFilter>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.source_id.is_none() && self.tags.is_empty() && self.since.is_none() && self.until.is_none()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(source) = &self.source_id {
            if &chunk.source_id != source {
                return false;
            }
        }
        if let Some(since) = self.since {
            if chunk.occurred_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if chunk.occurred_at > until {
                return false;
            }
        }
        self.tags.iter().all(|t| t.matches(chunk))
    }
}

/// Storage backend for indexed chunks.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace records by `chunk_id`, all or nothing |
/// | [`delete`](VectorStore::delete) | Remove records by `chunk_id` |
/// | [`query_dense`](VectorStore::query_dense) | Top-k by cosine similarity |
/// | [`query_sparse`](VectorStore::query_sparse) | Top-k by sparse dot product |
/// | [`count`](VectorStore::count) | Number of stored records |
///
/// Both queries apply `filters` before truncating to `k`, return only
/// positive scores, and order ties by `occurred_at` descending then
/// `chunk_id` ascending.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a batch atomically: either every record is written or none.
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), StoreError>;

    /// Delete the given chunk ids; unknown ids are ignored.
    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError>;

    async fn query_dense(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn query_sparse(
        &self,
        vector: &SparseVector,
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Sort scored chunks best first with the deterministic tie-break, then
/// keep `k`.
pub fn rank_and_truncate(mut hits: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.chunk.occurred_at.cmp(&a.chunk.occurred_at))
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
    hits.truncate(k);
    hits
}
