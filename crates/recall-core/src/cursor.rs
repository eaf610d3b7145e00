//! Per-source change tracking.
//!
//! A [`ChangeTracker`] decides whether the next pass over a source is a
//! full or incremental sync and owns the only path that advances a
//! source's cursor. Cursors are persisted through the [`CursorStore`]
//! trait; the app crate backs it with SQLite, tests use
//! [`InMemoryCursorStore`].
//!
//! A cursor is committed only after every document of a pass is durably
//! indexed, so a crash or failure mid-pass replays the same window on the
//! next run instead of silently skipping it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StateError;
use crate::models::{CursorKind, SourceCursor, SyncMode, SyncPlan};

/// Default window for a full sync when nothing better is known.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 90;

/// Durable storage for [`SourceCursor`] rows, keyed by source id.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, source_id: &str) -> Result<Option<SourceCursor>, StateError>;

    /// Insert or replace the row for `cursor.source_id` atomically.
    async fn save(&self, cursor: &SourceCursor) -> Result<(), StateError>;

    async fn delete(&self, source_id: &str) -> Result<(), StateError>;

    /// All known cursors, ordered by source id.
    async fn list(&self) -> Result<Vec<SourceCursor>, StateError>;
}

/// `HashMap` behind an `RwLock`, for tests and WASM targets.
#[derive(Default)]
pub struct InMemoryCursorStore {
    rows: RwLock<HashMap<String, SourceCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StateError {
    StateError("cursor store lock poisoned".to_string())
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, source_id: &str) -> Result<Option<SourceCursor>, StateError> {
        Ok(self.rows.read().map_err(poisoned)?.get(source_id).cloned())
    }

    async fn save(&self, cursor: &SourceCursor) -> Result<(), StateError> {
        self.rows
            .write()
            .map_err(poisoned)?
            .insert(cursor.source_id.clone(), cursor.clone());
        Ok(())
    }

    async fn delete(&self, source_id: &str) -> Result<(), StateError> {
        self.rows.write().map_err(poisoned)?.remove(source_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SourceCursor>, StateError> {
        let mut all: Vec<SourceCursor> = self.rows.read().map_err(poisoned)?.values().cloned().collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(all)
    }
}

/// Plans sync passes and commits cursors.
#[derive(Clone)]
pub struct ChangeTracker {
    store: Arc<dyn CursorStore>,
    lookback: Duration,
}

impl ChangeTracker {
    pub fn new(store: Arc<dyn CursorStore>) -> Self {
        Self::with_lookback(store, Duration::days(DEFAULT_LOOKBACK_DAYS))
    }

    pub fn with_lookback(store: Arc<dyn CursorStore>, lookback: Duration) -> Self {
        Self { store, lookback }
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Decide how the next pass over `source_id` runs.
    ///
    /// No cursor, or an expired one, plans a full sync over the lookback
    /// window. A valid incremental cursor plans an incremental sync that
    /// resumes from it.
    pub async fn plan_sync(&self, source_id: &str) -> Result<SyncPlan, StateError> {
        self.plan_sync_at(source_id, Utc::now()).await
    }

    pub async fn plan_sync_at(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncPlan, StateError> {
        let current = self.store.load(source_id).await?;
        let plan = match current {
            Some(SourceCursor {
                cursor_kind: CursorKind::Incremental,
                cursor_token: Some(token),
                ..
            }) => SyncPlan {
                source_id: source_id.to_string(),
                mode: SyncMode::Incremental,
                cursor_in: Some(token),
                since: None,
            },
            _ => SyncPlan {
                source_id: source_id.to_string(),
                mode: SyncMode::Full,
                cursor_in: None,
                since: Some(now - self.lookback),
            },
        };
        tracing::debug!(source = source_id, mode = %plan.mode, "planned sync");
        Ok(plan)
    }

    /// Record a successful pass. The only operation that advances a cursor.
    pub async fn commit_sync(
        &self,
        source_id: &str,
        new_cursor: &str,
        mode: SyncMode,
    ) -> Result<SourceCursor, StateError> {
        self.commit_sync_at(source_id, new_cursor, mode, Utc::now()).await
    }

    pub async fn commit_sync_at(
        &self,
        source_id: &str,
        new_cursor: &str,
        mode: SyncMode,
        now: DateTime<Utc>,
    ) -> Result<SourceCursor, StateError> {
        let mut cursor = self
            .store
            .load(source_id)
            .await?
            .unwrap_or_else(|| SourceCursor::empty(source_id));
        cursor.cursor_token = Some(new_cursor.to_string());
        cursor.cursor_kind = CursorKind::Incremental;
        match mode {
            SyncMode::Full => cursor.last_full_sync_at = Some(now),
            SyncMode::Incremental => cursor.last_incremental_sync_at = Some(now),
        }
        self.store.save(&cursor).await?;
        tracing::info!(source = source_id, %mode, cursor = new_cursor, "committed cursor");
        Ok(cursor)
    }

    /// Flag the cursor as rejected upstream so the next plan is a full sync.
    pub async fn mark_expired(&self, source_id: &str) -> Result<(), StateError> {
        let mut cursor = self
            .store
            .load(source_id)
            .await?
            .unwrap_or_else(|| SourceCursor::empty(source_id));
        cursor.cursor_kind = CursorKind::Expired;
        self.store.save(&cursor).await?;
        tracing::warn!(source = source_id, "cursor marked expired");
        Ok(())
    }

    /// Forget the source's cursor entirely.
    pub async fn reset(&self, source_id: &str) -> Result<(), StateError> {
        self.store.delete(source_id).await
    }

    pub async fn cursor(&self, source_id: &str) -> Result<Option<SourceCursor>, StateError> {
        self.store.load(source_id).await
    }

    pub async fn cursors(&self) -> Result<Vec<SourceCursor>, StateError> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tracker() -> ChangeTracker {
        ChangeTracker::with_lookback(Arc::new(InMemoryCursorStore::new()), Duration::days(30))
    }

    #[tokio::test]
    async fn test_first_plan_is_full_with_lookback() {
        let t = tracker();
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let plan = t.plan_sync_at("mail", now).await.unwrap();
        assert_eq!(plan.mode, SyncMode::Full);
        assert_eq!(plan.cursor_in, None);
        assert_eq!(plan.since, Some(Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_commit_then_incremental() {
        let t = tracker();
        let committed = t.commit_sync("mail", "c42", SyncMode::Full).await.unwrap();
        assert_eq!(committed.cursor_kind, CursorKind::Incremental);
        assert!(committed.last_full_sync_at.is_some());
        assert!(committed.last_incremental_sync_at.is_none());

        let plan = t.plan_sync("mail").await.unwrap();
        assert_eq!(plan.mode, SyncMode::Incremental);
        assert_eq!(plan.cursor_in.as_deref(), Some("c42"));
        assert_eq!(plan.since, None);
    }

    #[tokio::test]
    async fn test_incremental_commit_keeps_full_timestamp() {
        let t = tracker();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        t.commit_sync_at("mail", "c1", SyncMode::Full, t0).await.unwrap();
        let c = t
            .commit_sync_at("mail", "c2", SyncMode::Incremental, t1)
            .await
            .unwrap();
        assert_eq!(c.cursor_token.as_deref(), Some("c2"));
        assert_eq!(c.last_full_sync_at, Some(t0));
        assert_eq!(c.last_incremental_sync_at, Some(t1));
    }

    #[tokio::test]
    async fn test_expired_plans_full() {
        let t = tracker();
        t.commit_sync("mail", "c42", SyncMode::Full).await.unwrap();
        t.mark_expired("mail").await.unwrap();
        let plan = t.plan_sync("mail").await.unwrap();
        assert_eq!(plan.mode, SyncMode::Full);
        assert!(plan.since.is_some());

        let cursor = t.cursor("mail").await.unwrap().unwrap();
        assert_eq!(cursor.cursor_kind, CursorKind::Expired);
        assert_eq!(cursor.cursor_token.as_deref(), Some("c42"));
    }

    #[tokio::test]
    async fn test_reset() {
        let t = tracker();
        t.commit_sync("mail", "c1", SyncMode::Full).await.unwrap();
        t.reset("mail").await.unwrap();
        assert!(t.cursor("mail").await.unwrap().is_none());
        assert_eq!(t.plan_sync("mail").await.unwrap().mode, SyncMode::Full);
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let t = tracker();
        t.commit_sync("mail", "m1", SyncMode::Full).await.unwrap();
        assert_eq!(t.plan_sync("chat").await.unwrap().mode, SyncMode::Full);
        let ids: Vec<String> = t
            .cursors()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.source_id)
            .collect();
        assert_eq!(ids, vec!["mail"]);
    }
}
