//! # Recall Core
//!
//! Shared, WASM-safe logic for Recall: data models, change tracking,
//! chunking, heuristic tagging, the source/embedder/store contracts,
//! idempotent indexing, and hybrid search with rank fusion.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Persistence and network-bound collaborators
//! are reached through the traits in [`cursor`], [`index`], [`source`],
//! [`embedding`] and [`store`].
//!
//! ## Write path
//!
//! ```text
//! ChangeTracker ──plan──▶ SourceAdapter ──pages──▶ chunk ──▶ tag ──▶ Embedder ──▶ Indexer ──▶ VectorStore
//!      ▲                                                                                  │
//!      └──────────────────────────── commit (only after the pass succeeds) ◀──────────────┘
//! ```
//!
//! ## Read path
//!
//! [`search::search`] embeds the query, runs dense and sparse retrieval
//! against the same [`store::VectorStore`] and fuses both rankings.

pub mod chunk;
pub mod cursor;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod search;
pub mod source;
pub mod store;
pub mod tag;
