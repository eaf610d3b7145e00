//! SQLite-backed [`VectorStore`] implementation.
//!
//! Each record is one row of the `chunks` table with its tags as JSON and
//! both vectors as little-endian BLOBs. Queries push the source and time
//! filters into SQL, score the remaining rows in Rust (brute-force cosine
//! and sparse dot product), apply tag filters, and only then truncate.
//!
//! `occurred_at` is stored as Unix milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use recall_core::embedding::{
    blob_to_vec, cosine_similarity, sparse_dot, sparse_from_blob, sparse_to_blob, vec_to_blob,
};
use recall_core::error::StoreError;
use recall_core::models::{Chunk, IndexedRecord, SparseVector, Tags};
use recall_core::store::{rank_and_truncate, ScoredChunk, SearchFilters, VectorStore};

/// SQLite implementation of the [`VectorStore`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Chunk counts grouped by source id.
    pub async fn counts_by_source(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT source_id, COUNT(*) AS n FROM chunks GROUP BY source_id ORDER BY source_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;
        let mut counts = Vec::with_capacity(rows.len());
        for r in &rows {
            let source: String = r.try_get("source_id").map_err(read_err)?;
            let n: i64 = r.try_get("n").map_err(read_err)?;
            counts.push((source, n));
        }
        Ok(counts)
    }

    /// Rows passing the SQL-expressible filters, with the named vector column.
    async fn candidates(
        &self,
        vector_column: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SqliteRow>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, source_id, parent_external_id, chunk_index, total_chunks, text, \
             range_start, range_end, hash, tags_json, occurred_at, ",
        );
        qb.push(vector_column);
        qb.push(" AS vector FROM chunks WHERE 1 = 1");
        if let Some(source) = &filters.source_id {
            qb.push(" AND source_id = ").push_bind(source.clone());
        }
        if let Some(since) = filters.since {
            qb.push(" AND occurred_at >= ").push_bind(since.timestamp_millis());
        }
        if let Some(until) = filters.until {
            qb.push(" AND occurred_at <= ").push_bind(until.timestamp_millis());
        }
        qb.build().fetch_all(&self.pool).await.map_err(read_err)
    }

    fn score_rows<F>(
        rows: &[SqliteRow],
        filters: &SearchFilters,
        k: usize,
        score: F,
    ) -> Result<Vec<ScoredChunk>, StoreError>
    where
        F: Fn(&[u8]) -> f64,
    {
        let mut hits = Vec::new();
        for row in rows {
            let blob: Vec<u8> = row.try_get("vector").map_err(read_err)?;
            let s = score(&blob);
            if s <= 0.0 {
                continue;
            }
            let chunk = row_to_chunk(row)?;
            if filters.tags.iter().all(|t| t.matches(&chunk)) {
                hits.push(ScoredChunk { chunk, score: s });
            }
        }
        Ok(rank_and_truncate(hits, k))
    }
}

fn read_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Read(e.to_string())
}

fn write_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Write(e.to_string())
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk, StoreError> {
    let tags_json: String = row.try_get("tags_json").map_err(read_err)?;
    let tags: Tags = serde_json::from_str(&tags_json).map_err(read_err)?;
    let occurred_ms: i64 = row.try_get("occurred_at").map_err(read_err)?;
    let occurred_at = DateTime::<Utc>::from_timestamp_millis(occurred_ms)
        .ok_or_else(|| StoreError::Read(format!("bad timestamp {}", occurred_ms)))?;
    let range_start: i64 = row.try_get("range_start").map_err(read_err)?;
    let range_end: i64 = row.try_get("range_end").map_err(read_err)?;
    let chunk_index: i64 = row.try_get("chunk_index").map_err(read_err)?;
    let total_chunks: i64 = row.try_get("total_chunks").map_err(read_err)?;

    Ok(Chunk {
        chunk_id: row.try_get("id").map_err(read_err)?,
        source_id: row.try_get("source_id").map_err(read_err)?,
        parent_external_id: row.try_get("parent_external_id").map_err(read_err)?,
        chunk_index: chunk_index as usize,
        total_chunks: total_chunks as usize,
        text: row.try_get("text").map_err(read_err)?,
        char_range: range_start as usize..range_end as usize,
        hash: row.try_get("hash").map_err(read_err)?,
        tags,
        occurred_at,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;

        for r in records {
            let c = &r.chunk;
            let tags_json = serde_json::to_string(&c.tags).map_err(write_err)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source_id, parent_external_id, chunk_index, total_chunks,
                                    text, range_start, range_end, hash, tags_json, occurred_at,
                                    dense, sparse)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    source_id = excluded.source_id,
                    parent_external_id = excluded.parent_external_id,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    text = excluded.text,
                    range_start = excluded.range_start,
                    range_end = excluded.range_end,
                    hash = excluded.hash,
                    tags_json = excluded.tags_json,
                    occurred_at = excluded.occurred_at,
                    dense = excluded.dense,
                    sparse = excluded.sparse
                "#,
            )
            .bind(&c.chunk_id)
            .bind(&c.source_id)
            .bind(&c.parent_external_id)
            .bind(c.chunk_index as i64)
            .bind(c.total_chunks as i64)
            .bind(&c.text)
            .bind(c.char_range.start as i64)
            .bind(c.char_range.end as i64)
            .bind(&c.hash)
            .bind(&tags_json)
            .bind(c.occurred_at.timestamp_millis())
            .bind(vec_to_blob(&r.dense))
            .bind(sparse_to_blob(&r.sparse))
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        }

        tx.commit().await.map_err(write_err)?;
        Ok(())
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;
        for id in chunk_ids {
            sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(write_err)?;
        }
        tx.commit().await.map_err(write_err)?;
        Ok(())
    }

    async fn query_dense(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let rows = self.candidates("dense", filters).await?;
        Self::score_rows(&rows, filters, k, |blob| {
            cosine_similarity(vector, &blob_to_vec(blob)) as f64
        })
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
        let rows = self.candidates("sparse", filters).await?;
        Self::score_rows(&rows, filters, k, |blob| {
            sparse_dot(vector, &sparse_from_blob(blob)) as f64
        })
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(read_err)?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use chrono::TimeZone;
    use recall_core::embedding::{sparse_encode, HashEmbedder};
    use recall_core::store::TagFilter;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("t.sqlite")).await.unwrap();
        migrate_pool(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn record(id: &str, source: &str, text: &str, day: u32) -> IndexedRecord {
        let mut tags = Tags::default();
        if text.contains("Alice") {
            tags.people.insert("Alice".to_string());
        }
        IndexedRecord {
            chunk: Chunk {
                chunk_id: id.to_string(),
                source_id: source.to_string(),
                parent_external_id: format!("{}-doc", id),
                chunk_index: 0,
                total_chunks: 1,
                text: text.to_string(),
                char_range: 0..text.len(),
                hash: recall_core::chunk::content_hash(text),
                tags,
                occurred_at: Utc.with_ymd_and_hms(2024, 4, day, 8, 30, 0).unwrap(),
            },
            dense: HashEmbedder::new(256).embed_text(text),
            sparse: sparse_encode(text),
        }
    }

    #[tokio::test]
    async fn test_upsert_roundtrip_and_replace() {
        let (_tmp, store) = store().await;
        let r = record("a", "mail", "Alice approved the budget", 2);
        store.upsert(&[r.clone()]).await.unwrap();
        store.upsert(&[r.clone()]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let hits = store
            .query_sparse(&sparse_encode("budget"), &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk, r.chunk);
    }

    #[tokio::test]
    async fn test_filters_in_sql_and_rust() {
        let (_tmp, store) = store().await;
        store
            .upsert(&[
                record("a", "mail", "Alice says kafka lag is back", 2),
                record("b", "mail", "kafka lag dashboard", 10),
                record("c", "chat", "kafka lag in chat with Alice", 12),
            ])
            .await
            .unwrap();
        let q = sparse_encode("kafka lag");

        let by_source = SearchFilters {
            source_id: Some("mail".to_string()),
            ..Default::default()
        };
        assert_eq!(store.query_sparse(&q, &by_source, 10).await.unwrap().len(), 2);

        let by_time = SearchFilters {
            since: Some(Utc.with_ymd_and_hms(2024, 4, 5, 0, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2024, 4, 11, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let hits = store.query_sparse(&q, &by_time, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk_id, "b");

        let by_person = SearchFilters {
            tags: vec![TagFilter::Person("Alice".to_string())],
            ..Default::default()
        };
        let dense = HashEmbedder::new(256).embed_text("kafka lag");
        let hits = store.query_dense(&dense, &by_person, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.tags.people.contains("Alice"));
    }

    #[tokio::test]
    async fn test_delete_and_counts() {
        let (_tmp, store) = store().await;
        store
            .upsert(&[
                record("a", "mail", "one", 1),
                record("b", "mail", "two", 1),
                record("c", "chat", "three", 1),
            ])
            .await
            .unwrap();
        store.delete(&["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(
            store.counts_by_source().await.unwrap(),
            vec![("chat".to_string(), 1), ("mail".to_string(), 1)]
        );
    }
}
