//! # Recall
//!
//! **Change-tracked personal context ingestion with hybrid search.**
//!
//! Recall pulls documents from personal data sources (chat exports, OCR
//! dumps, saved mail), splits them into overlapping chunks, tags each chunk
//! with people, projects, decisions, action items, topics, dates and
//! sentiment, and indexes them with a dense and a sparse vector. Search
//! fuses both retrievals with reciprocal rank fusion.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────────┐   ┌───────────┐
//! │   Sources   │──▶│  Sync pipeline  │──▶│  SQLite   │
//! │  dir:<name> │   │ chunk+tag+embed │   │  chunks,  │
//! └─────────────┘   └────────┬────────┘   │  cursors  │
//!                            │ cursor     └─────┬─────┘
//!                            ▼                  ▼
//!                      ChangeTracker        rcl search
//! ```
//!
//! ## Data Flow
//!
//! 1. The change tracker plans each pass as full (lookback window) or
//!    incremental (from the stored cursor).
//! 2. A **source adapter** ([`connector_dir`]) pages through new or changed
//!    documents, explicit deletions and the live-id manifest.
//! 3. The **sync engine** ([`sync`]) chunks and tags documents on the
//!    blocking pool, embeds them in batches ([`embedding`]) and upserts
//!    them into the store ([`sqlite_store`]).
//! 4. Only a pass that finishes without failures commits its cursor
//!    ([`state`]).
//! 5. **Search** ([`search`]) runs dense and sparse retrievals and fuses them.
//!
//! ## Quick Start
//!
//! ```bash
//! rcl init                         # create database
//! rcl sync all                     # sync every configured source
//! rcl sync chats --full            # re-list one source over the lookback window
//! rcl search "release plan" --person Alice --since 2024-03-01
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`connector_dir`] | `dir:<name>` source adapter over a directory of exports |
//! | [`embedding`] | Hash, OpenAI, Ollama and fastembed embedders, retry policy |
//! | [`sync`] | Sync orchestration: plan → page → chunk/tag → embed → upsert → commit |
//! | [`search`] | CLI search front end |
//! | [`sources`] | Configured sources and their cursor state |
//! | [`sqlite_store`] | `VectorStore` over SQLite |
//! | [`state`] | Cursor store and chunk ledger over SQLite |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema (idempotent) |

pub mod config;
pub mod connector_dir;
pub mod db;
pub mod embedding;
pub mod migrate;
pub mod search;
pub mod sources;
pub mod sqlite_store;
pub mod state;
pub mod sync;

pub use recall_core::{models, store};
