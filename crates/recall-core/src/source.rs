//! Source adapter contract.
//!
//! A source adapter wraps one upstream system (a mail account, a chat
//! workspace, a directory of notes) and exposes it as pages of
//! [`RawDocument`]s. Adapters never write to the index or commit cursors;
//! they only read. The orchestrator drives them with the plan produced by
//! [`crate::cursor::ChangeTracker`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{MalformedDocument, SourceError};
use crate::models::RawDocument;

/// One page of results from a source.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    /// New or changed documents.
    pub documents: Vec<RawDocument>,
    /// Items the adapter saw but could not turn into a document.
    pub rejected: Vec<MalformedDocument>,
    /// External ids the upstream reports as deleted.
    pub deleted: Vec<String>,
    /// Complete set of external ids still alive upstream, when the adapter
    /// can enumerate them. Used to reconcile deletions after a full sync.
    pub live_ids: Option<Vec<String>>,
    /// Opaque token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
    /// Cursor representing the upstream position after this page. The
    /// value from the last page is what gets committed.
    pub cursor: String,
}

impl SourcePage {
    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}

/// Read-only access to one upstream system.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier of this source; keys cursors and chunk ids.
    fn source_id(&self) -> &str;

    /// Changes after `cursor`.
    ///
    /// Returns [`SourceError::CursorExpired`] when the upstream no longer
    /// honours the cursor.
    async fn list_since(
        &self,
        cursor: &str,
        page_token: Option<&str>,
    ) -> Result<SourcePage, SourceError>;

    /// Every document that occurred at or after `since` (all documents when
    /// `since` is `None`).
    async fn list_full(
        &self,
        since: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<SourcePage, SourceError>;
}
