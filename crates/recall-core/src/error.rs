//! Error types for Recall.
//!
//! Each collaborator boundary has its own enum so the sync orchestrator
//! can tell recoverable, per-document failures apart from failures that
//! must abort a pass.

use thiserror::Error;

/// Errors returned by a source adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The upstream no longer accepts the cursor (e.g. change-log
    /// retention expired). The source must be resynchronized in full.
    #[error("cursor for source '{source_id}' is no longer valid")]
    CursorExpired { source_id: String },

    /// Network, auth or rate-limit trouble. Retry later from the same cursor.
    #[error("transient source error: {0}")]
    Transient(String),
}

/// A single document the pipeline cannot process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed document {source_id}/{external_id}: {reason}")]
pub struct MalformedDocument {
    pub source_id: String,
    pub external_id: String,
    pub reason: String,
}

impl MalformedDocument {
    pub fn new(source_id: &str, external_id: &str, reason: impl Into<String>) -> Self {
        Self {
            source_id: source_id.to_string(),
            external_id: external_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Embedding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    /// Rate limits, server errors, timeouts. Worth retrying.
    #[error("transient embedding error: {0}")]
    Transient(String),

    /// Bad request, bad credentials, malformed response.
    #[error("embedding failed: {0}")]
    Failed(String),
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

/// Vector store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store write failed: {0}")]
    Write(String),

    #[error("store read failed: {0}")]
    Read(String),
}

/// Errors from the persisted sync state (cursors and chunk ledger).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sync state error: {0}")]
pub struct StateError(pub String);

/// Failures that abort a whole sync pass.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The cursor was marked expired; rerun the pass (it will plan a full sync).
    #[error("cursor expired for source '{source_id}'; the next pass will run a full sync")]
    CursorExpired { source_id: String },

    #[error(transparent)]
    Source(SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Another pass for the same source is in flight.
    #[error("a sync pass for source '{0}' is already running")]
    SourceBusy(String),

    #[error("sync worker failed: {0}")]
    Worker(String),
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::CursorExpired { source_id } => SyncError::CursorExpired { source_id },
            other => SyncError::Source(other),
        }
    }
}

/// Errors from the hybrid search read path.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
