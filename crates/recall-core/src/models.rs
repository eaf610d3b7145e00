//! Core data models used throughout Recall.
//!
//! These types represent the documents, chunks, tags, vectors and sync
//! bookkeeping that flow through the ingestion and retrieval pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedDocument;

/// Raw item produced by a source adapter before chunking.
///
/// `provenance` carries whatever the source knows about the item (sender,
/// recipients, application name, file path). The pipeline stores it
/// opaquely and never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub source_id: String,
    pub external_id: String,
    pub raw_text: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub provenance: serde_json::Value,
}

impl RawDocument {
    /// Check the invariants the pipeline relies on.
    ///
    /// A document without an external id cannot be keyed, and a NUL byte
    /// in the body is a reliable sign of a binary blob mislabelled as text.
    pub fn validate(&self) -> Result<(), MalformedDocument> {
        if self.external_id.trim().is_empty() {
            return Err(MalformedDocument::new(
                &self.source_id,
                &self.external_id,
                "empty external id",
            ));
        }
        if self.raw_text.contains('\0') {
            return Err(MalformedDocument::new(
                &self.source_id,
                &self.external_id,
                "body contains NUL bytes",
            ));
        }
        Ok(())
    }
}

/// Coarse sentiment bucket attached to every chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(format!(
                "unknown sentiment '{}': use positive, negative or neutral",
                other
            )),
        }
    }
}

/// Structured signal extracted from a chunk by [`crate::tag::tag`].
///
/// Every field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub people: BTreeSet<String>,
    #[serde(default)]
    pub projects: BTreeSet<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    /// Top-K terms, highest score first.
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub dates_mentioned: Vec<NaiveDate>,
    #[serde(default)]
    pub sentiment: Sentiment,
}

/// A bounded segment of a document's text: the unit of indexing.
///
/// `chunk_id` is derived from `(source_id, parent_external_id,
/// chunk_index)` so the same document always produces the same ids.
/// `char_range` is the byte range of `text` inside the original document
/// body, always on UTF-8 char boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: String,
    pub parent_external_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    pub char_range: Range<usize>,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub tags: Tags,
    pub occurred_at: DateTime<Utc>,
}

/// Term-weighted vector with sorted, unique indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Store-side record: a chunk plus both of its vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRecord {
    pub chunk: Chunk,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

/// State of a source's cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorKind {
    /// Never synchronized (or reset).
    #[default]
    None,
    /// A valid position in the source's change log.
    Incremental,
    /// The upstream rejected the cursor; a full sync must run next.
    Expired,
}

impl CursorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorKind::None => "none",
            CursorKind::Incremental => "incremental",
            CursorKind::Expired => "expired",
        }
    }
}

impl FromStr for CursorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CursorKind::None),
            "incremental" => Ok(CursorKind::Incremental),
            "expired" => Ok(CursorKind::Expired),
            other => Err(format!("unknown cursor kind '{}'", other)),
        }
    }
}

/// Last committed sync position of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCursor {
    pub source_id: String,
    pub cursor_token: Option<String>,
    pub cursor_kind: CursorKind,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_incremental_sync_at: Option<DateTime<Utc>>,
}

impl SourceCursor {
    pub fn empty(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            cursor_token: None,
            cursor_kind: CursorKind::None,
            last_full_sync_at: None,
            last_incremental_sync_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sync pass should do, as decided by the change tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub source_id: String,
    pub mode: SyncMode,
    /// Cursor to resume from (incremental only).
    pub cursor_in: Option<String>,
    /// Start of the lookback window (full only).
    pub since: Option<DateTime<Utc>>,
}

/// Outcome of one sync pass. Never a bare boolean.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub source_id: String,
    pub mode: SyncMode,
    /// Documents chunked, tagged, embedded and upserted.
    pub processed: u64,
    /// Malformed documents skipped.
    pub skipped: u64,
    /// Documents whose embedding batch failed; retried next pass.
    pub failed: u64,
    /// Documents removed from the index.
    pub deleted: u64,
    pub chunks_written: u64,
    pub cursor_committed: bool,
}

impl SyncReport {
    pub fn new(source_id: &str, mode: SyncMode) -> Self {
        Self {
            source_id: source_id.to_string(),
            mode,
            processed: 0,
            skipped: 0,
            failed: 0,
            deleted: 0,
            chunks_written: 0,
            cursor_committed: false,
        }
    }
}
