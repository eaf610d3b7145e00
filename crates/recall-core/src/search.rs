//! Hybrid retrieval with reciprocal rank fusion.
//!
//! The search algorithm operates entirely through the [`VectorStore`] and
//! [`Embedder`] traits, with no database or configuration dependencies.
//!
//! # Algorithm
//!
//! 1. Embed the query once, producing a dense and a sparse vector.
//! 2. Fetch `K = candidate_multiplier × limit` dense candidates (cosine)
//!    and `K` sparse candidates (lexical dot product). The store applies
//!    filters before truncating to `K`.
//! 3. Fuse: every candidate in either list scores
//!    `Σ 1 / (rrf_k + rank)` over the lists it appears in, ranks 1-based.
//! 4. Sort by fused score (desc), `occurred_at` (desc), `chunk_id` (asc).
//! 5. Truncate to `limit`.
//!
//! Rank fusion ignores the raw score scales of the two retrievers, so no
//! normalization step is needed.

use std::collections::HashMap;

use serde::Serialize;

use crate::embedding::{embed_one, Embedder};
use crate::error::SearchError;
use crate::models::Chunk;
use crate::store::{ScoredChunk, SearchFilters, VectorStore};

/// Fusion tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// RRF damping constant. Larger values flatten the rank curve.
    pub rrf_k: f64,
    /// Candidates fetched per retriever, as a multiple of the limit.
    pub candidate_multiplier: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            candidate_multiplier: 4,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub filters: SearchFilters,
    pub limit: usize,
}

/// One fused result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Fused RRF score.
    pub score: f64,
    /// 1-based rank in the dense list, if the chunk appeared there.
    pub dense_rank: Option<usize>,
    /// 1-based rank in the sparse list, if the chunk appeared there.
    pub sparse_rank: Option<usize>,
}

/// Run a hybrid search.
///
/// Blank queries and a zero limit return no results without touching the
/// embedder or the store.
pub async fn search(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    req: &SearchRequest,
    params: &SearchParams,
) -> Result<Vec<SearchHit>, SearchError> {
    if req.query.trim().is_empty() || req.limit == 0 {
        return Ok(Vec::new());
    }

    let query = embed_one(embedder, &req.query).await?;
    let k = req.limit.saturating_mul(params.candidate_multiplier.max(1));

    let dense = store.query_dense(&query.dense, &req.filters, k).await?;
    let sparse = store.query_sparse(&query.sparse, &req.filters, k).await?;
    tracing::debug!(
        dense = dense.len(),
        sparse = sparse.len(),
        k,
        "retrieved hybrid candidates"
    );

    Ok(fuse(dense, sparse, params.rrf_k, req.limit))
}

/// Reciprocal rank fusion of two ranked lists.
///
/// Inputs must already be ordered best first. The output contains the
/// union of both lists, truncated to `limit`.
pub fn fuse(dense: Vec<ScoredChunk>, sparse: Vec<ScoredChunk>, rrf_k: f64, limit: usize) -> Vec<SearchHit> {
    let mut merged: HashMap<String, SearchHit> = HashMap::new();

    for (i, hit) in dense.into_iter().enumerate() {
        let rank = i + 1;
        merged
            .entry(hit.chunk.chunk_id.clone())
            .or_insert_with(|| SearchHit {
                chunk: hit.chunk,
                score: 0.0,
                dense_rank: None,
                sparse_rank: None,
            })
            .dense_rank = Some(rank);
    }
    for (i, hit) in sparse.into_iter().enumerate() {
        let rank = i + 1;
        merged
            .entry(hit.chunk.chunk_id.clone())
            .or_insert_with(|| SearchHit {
                chunk: hit.chunk,
                score: 0.0,
                dense_rank: None,
                sparse_rank: None,
            })
            .sparse_rank = Some(rank);
    }

    let mut results: Vec<SearchHit> = merged
        .into_values()
        .map(|mut h| {
            h.score = [h.dense_rank, h.sparse_rank]
                .into_iter()
                .flatten()
                .map(|r| 1.0 / (rrf_k + r as f64))
                .sum();
            h
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.chunk.occurred_at.cmp(&a.chunk.occurred_at))
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::embedding::{sparse_encode, HashEmbedder};
    use crate::models::{IndexedRecord, Tags};
    use crate::store::memory::InMemoryStore;
    use crate::store::TagFilter;
    use chrono::{TimeZone, Utc};

    fn chunk(id: &str, day: u32) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            source_id: "s".to_string(),
            parent_external_id: id.to_string(),
            chunk_index: 0,
            total_chunks: 1,
            text: String::new(),
            char_range: 0..0,
            hash: String::new(),
            tags: Tags::default(),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    fn ranked(ids: &[&str]) -> Vec<ScoredChunk> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ScoredChunk {
                chunk: chunk(id, 1),
                score: 1.0 - i as f64 * 0.1,
            })
            .collect()
    }

    #[test]
    fn test_fuse_scores() {
        let hits = fuse(ranked(&["a", "b"]), ranked(&["b", "c"]), 60.0, 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!((hits[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert_eq!(hits[0].dense_rank, Some(2));
        assert_eq!(hits[0].sparse_rank, Some(1));
        assert!((hits[1].score - 1.0 / 61.0).abs() < 1e-12);
        assert_eq!(hits[2].dense_rank, None);
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_fuse_truncation_only_drops_outranked_records() {
        let limit = 2;
        let dense_ids = ["both", "d2", "shared", "d4", "d5"];
        let mut sparse_ids = vec!["both", "shared", "s3", "s4", "d2"];

        for _ in 0..sparse_ids.len() {
            let all = fuse(ranked(&dense_ids), ranked(&sparse_ids), 60.0, usize::MAX);
            let top = fuse(ranked(&dense_ids), ranked(&sparse_ids), 60.0, limit);

            assert_eq!(top.len(), limit);
            assert_eq!(ids(&top), ids(&all)[..limit].to_vec());

            let kept = ids(&top);
            let floor = top.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
            for candidate in dense_ids[..limit].iter().chain(&sparse_ids[..limit]) {
                if kept.contains(candidate) {
                    continue;
                }
                let dropped = all.iter().find(|h| h.chunk.chunk_id == *candidate).unwrap();
                assert!(
                    dropped.score <= floor,
                    "{} ({}) dropped while a kept hit scored {}",
                    candidate,
                    dropped.score,
                    floor
                );
            }
            sparse_ids.rotate_left(1);
        }
    }

    #[test]
    fn test_fuse_first_in_both_lists_always_survives() {
        let dense = ranked(&["top", "d2", "d3"]);
        let sparse = ranked(&["top", "s2", "s3"]);
        let hits = fuse(dense, sparse, 60.0, 1);
        assert_eq!(ids(&hits), vec!["top"]);
        assert!((hits[0].score - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_fuse_returns_union_of_both_lists() {
        let hits = fuse(ranked(&["d1", "x", "y", "z"]), ranked(&["s1", "z", "y", "x"]), 60.0, usize::MAX);
        let got = ids(&hits);
        assert_eq!(hits.len(), 6);
        assert!(got.contains(&"d1") && got.contains(&"s1"));
    }

    #[test]
    fn test_fuse_tie_break_newest_then_id() {
        let dense = vec![
            ScoredChunk { chunk: chunk("b", 1), score: 0.9 },
        ];
        let sparse = vec![
            ScoredChunk { chunk: chunk("a", 1), score: 0.9 },
        ];
        let hits = fuse(dense.clone(), sparse.clone(), 60.0, 10);
        assert_eq!(hits[0].chunk.chunk_id, "a");

        let newer = vec![ScoredChunk { chunk: chunk("c", 5), score: 0.9 }];
        let hits = fuse(dense, newer, 60.0, 10);
        assert_eq!(hits[0].chunk.chunk_id, "c");
    }

    async fn seeded() -> (InMemoryStore, HashEmbedder) {
        let e = HashEmbedder::new(256);
        let store = InMemoryStore::new();
        let docs = [
            ("mail", "m1", "Kafka consumer lag alert fired overnight", 3),
            ("mail", "m2", "Quarterly budget review with finance", 4),
            ("chat", "c1", "kafka lag again, Alice restarted the consumer", 5),
        ];
        let mut records = Vec::new();
        for (source, ext, text, day) in docs {
            let mut c = chunk(&chunk_id(source, ext, 0), day);
            c.source_id = source.to_string();
            c.text = text.to_string();
            if ext == "c1" {
                c.tags.people.insert("Alice".to_string());
            }
            records.push(IndexedRecord {
                dense: e.embed_text(text),
                sparse: sparse_encode(text),
                chunk: c,
            });
        }
        store.upsert(&records).await.unwrap();
        (store, e)
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_first() {
        let (store, e) = seeded().await;
        let req = SearchRequest {
            query: "kafka consumer lag".to_string(),
            limit: 2,
            ..Default::default()
        };
        let hits = search(&store, &e, &req, &SearchParams::default()).await.unwrap();
        assert_eq!(hits.len(), 2);
        for h in &hits {
            assert!(h.chunk.text.to_lowercase().contains("kafka"));
        }
    }

    #[tokio::test]
    async fn test_search_applies_filters() {
        let (store, e) = seeded().await;
        let req = SearchRequest {
            query: "kafka consumer lag".to_string(),
            limit: 5,
            filters: SearchFilters {
                tags: vec![TagFilter::Person("alice".to_string())],
                ..Default::default()
            },
        };
        let hits = search(&store, &e, &req, &SearchParams::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source_id, "chat");
    }

    #[tokio::test]
    async fn test_blank_query_is_empty() {
        let (store, e) = seeded().await;
        let req = SearchRequest {
            query: "   ".to_string(),
            limit: 5,
            ..Default::default()
        };
        assert!(search(&store, &e, &req, &SearchParams::default())
            .await
            .unwrap()
            .is_empty());
    }
}
