//! SQLite persistence for sync state.
//!
//! [`SqliteStateStore`] backs both the change tracker's cursors
//! (`source_cursors`) and the indexer's chunk ledger (`document_chunks`).
//! Each save is a single-row `INSERT … ON CONFLICT DO UPDATE`, so a
//! cursor is replaced atomically or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use recall_core::cursor::CursorStore;
use recall_core::error::StateError;
use recall_core::index::ChunkLedger;
use recall_core::models::{CursorKind, SourceCursor};

#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn state_err(e: impl std::fmt::Display) -> StateError {
    StateError(e.to_string())
}

fn ts(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn row_to_cursor(row: &SqliteRow) -> Result<SourceCursor, StateError> {
    let kind: String = row.try_get("cursor_kind").map_err(state_err)?;
    Ok(SourceCursor {
        source_id: row.try_get("source_id").map_err(state_err)?,
        cursor_token: row.try_get("cursor_token").map_err(state_err)?,
        cursor_kind: kind.parse::<CursorKind>().map_err(StateError)?,
        last_full_sync_at: ts(row.try_get("last_full_sync_at").map_err(state_err)?),
        last_incremental_sync_at: ts(row
            .try_get("last_incremental_sync_at")
            .map_err(state_err)?),
    })
}

#[async_trait]
impl CursorStore for SqliteStateStore {
    async fn load(&self, source_id: &str) -> Result<Option<SourceCursor>, StateError> {
        let row = sqlx::query(
            "SELECT source_id, cursor_token, cursor_kind, last_full_sync_at, last_incremental_sync_at \
             FROM source_cursors WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(state_err)?;
        row.as_ref().map(row_to_cursor).transpose()
    }

    async fn save(&self, cursor: &SourceCursor) -> Result<(), StateError> {
        sqlx::query(
            r#"
            INSERT INTO source_cursors (source_id, cursor_token, cursor_kind,
                                        last_full_sync_at, last_incremental_sync_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                cursor_token = excluded.cursor_token,
                cursor_kind = excluded.cursor_kind,
                last_full_sync_at = excluded.last_full_sync_at,
                last_incremental_sync_at = excluded.last_incremental_sync_at
            "#,
        )
        .bind(&cursor.source_id)
        .bind(&cursor.cursor_token)
        .bind(cursor.cursor_kind.as_str())
        .bind(cursor.last_full_sync_at.map(|t| t.timestamp_millis()))
        .bind(cursor.last_incremental_sync_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .map_err(state_err)?;
        Ok(())
    }

    async fn delete(&self, source_id: &str) -> Result<(), StateError> {
        sqlx::query("DELETE FROM source_cursors WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(state_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SourceCursor>, StateError> {
        let rows = sqlx::query(
            "SELECT source_id, cursor_token, cursor_kind, last_full_sync_at, last_incremental_sync_at \
             FROM source_cursors ORDER BY source_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(state_err)?;
        rows.iter().map(row_to_cursor).collect()
    }
}

#[async_trait]
impl ChunkLedger for SqliteStateStore {
    async fn chunk_ids(&self, source_id: &str, external_id: &str) -> Result<Vec<String>, StateError> {
        let json: Option<String> = sqlx::query_scalar(
            "SELECT chunk_ids_json FROM document_chunks WHERE source_id = ? AND external_id = ?",
        )
        .bind(source_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(state_err)?;
        match json {
            Some(j) => serde_json::from_str(&j).map_err(state_err),
            None => Ok(Vec::new()),
        }
    }

    async fn record(
        &self,
        source_id: &str,
        external_id: &str,
        chunk_ids: &[String],
    ) -> Result<(), StateError> {
        let json = serde_json::to_string(chunk_ids).map_err(state_err)?;
        sqlx::query(
            r#"
            INSERT INTO document_chunks (source_id, external_id, chunk_ids_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(source_id, external_id) DO UPDATE SET
                chunk_ids_json = excluded.chunk_ids_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source_id)
        .bind(external_id)
        .bind(&json)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(state_err)?;
        Ok(())
    }

    async fn forget(&self, source_id: &str, external_id: &str) -> Result<(), StateError> {
        sqlx::query("DELETE FROM document_chunks WHERE source_id = ? AND external_id = ?")
            .bind(source_id)
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(state_err)?;
        Ok(())
    }

    async fn documents(&self, source_id: &str) -> Result<Vec<String>, StateError> {
        sqlx::query_scalar(
            "SELECT external_id FROM document_chunks WHERE source_id = ? ORDER BY external_id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(state_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use recall_core::cursor::ChangeTracker;
    use recall_core::models::SyncMode;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn state() -> (TempDir, SqliteStateStore) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("s.sqlite")).await.unwrap();
        migrate_pool(&pool).await.unwrap();
        (tmp, SqliteStateStore::new(pool))
    }

    #[tokio::test]
    async fn test_cursor_lifecycle_persists() {
        let (_tmp, s) = state().await;
        let tracker = ChangeTracker::new(Arc::new(s.clone()));

        assert_eq!(tracker.plan_sync("dir:mail").await.unwrap().mode, SyncMode::Full);
        tracker.commit_sync("dir:mail", "1718000000", SyncMode::Full).await.unwrap();

        let reopened = ChangeTracker::new(Arc::new(s.clone()));
        let plan = reopened.plan_sync("dir:mail").await.unwrap();
        assert_eq!(plan.mode, SyncMode::Incremental);
        assert_eq!(plan.cursor_in.as_deref(), Some("1718000000"));

        reopened.mark_expired("dir:mail").await.unwrap();
        let c = s.load("dir:mail").await.unwrap().unwrap();
        assert_eq!(c.cursor_kind, CursorKind::Expired);
        assert!(c.last_full_sync_at.is_some());

        reopened.reset("dir:mail").await.unwrap();
        assert!(s.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ledger() {
        let (_tmp, s) = state().await;
        let ids = vec!["c0".to_string(), "c1".to_string()];
        s.record("dir:mail", "b.eml", &ids).await.unwrap();
        s.record("dir:mail", "a.eml", &ids[..1]).await.unwrap();
        s.record("dir:chat", "x.txt", &ids).await.unwrap();

        assert_eq!(s.chunk_ids("dir:mail", "b.eml").await.unwrap(), ids);
        assert_eq!(s.documents("dir:mail").await.unwrap(), vec!["a.eml", "b.eml"]);

        s.forget("dir:mail", "b.eml").await.unwrap();
        assert!(s.chunk_ids("dir:mail", "b.eml").await.unwrap().is_empty());
        assert_eq!(s.documents("dir:mail").await.unwrap(), vec!["a.eml"]);
    }
}
