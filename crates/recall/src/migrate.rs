//! Database schema creation (idempotent).
//!
//! | Table | Contents |
//! |-------|----------|
//! | `chunks` | Indexed chunks: text, tags JSON, dense and sparse vector BLOBs |
//! | `source_cursors` | One row per source: cursor token, kind, last sync times |
//! | `document_chunks` | Ledger of chunk ids currently owned by each document |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect to the configured database and create any missing tables.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            parent_external_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            text TEXT NOT NULL,
            range_start INTEGER NOT NULL,
            range_end INTEGER NOT NULL,
            hash TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '{}',
            occurred_at INTEGER NOT NULL,
            dense BLOB NOT NULL,
            sparse BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_cursors (
            source_id TEXT PRIMARY KEY,
            cursor_token TEXT,
            cursor_kind TEXT NOT NULL DEFAULT 'none',
            last_full_sync_at INTEGER,
            last_incremental_sync_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            source_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            chunk_ids_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (source_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_occurred_at ON chunks(occurred_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
