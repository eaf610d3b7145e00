//! Configured sources and their sync state.
//!
//! Used by `rcl sources` to report, for each `dir:<name>` connector,
//! whether its root exists, where its cursor stands and how many chunks
//! it currently owns in the index.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use recall_core::cursor::CursorStore;
use recall_core::models::CursorKind;
use recall_core::source::SourceAdapter;

use crate::config::Config;
use crate::connector_dir::DirSource;
use crate::sqlite_store::SqliteStore;
use crate::state::SqliteStateStore;

/// Instantiate an adapter for every configured connector, in source id order.
pub fn build_adapters(config: &Config) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for (name, dir) in &config.connectors.dir {
        let source = DirSource::new(name, dir, config.sync.page_size)
            .with_context(|| format!("Invalid connector dir:{}", name))?;
        adapters.push(Arc::new(source));
    }
    Ok(adapters)
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// Source id (e.g. `"dir:chats"`).
    pub name: String,
    pub healthy: bool,
    pub notes: Option<String>,
    pub cursor_kind: CursorKind,
    pub cursor: Option<String>,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_incremental_sync_at: Option<DateTime<Utc>>,
    pub chunks: i64,
}

pub async fn get_sources(
    config: &Config,
    state: &SqliteStateStore,
    store: &SqliteStore,
) -> Result<Vec<SourceStatus>> {
    let counts: HashMap<String, i64> = store.counts_by_source().await?.into_iter().collect();

    let mut statuses = Vec::new();
    for (name, dir) in &config.connectors.dir {
        let source_id = format!("dir:{}", name);
        let cursor = state.load(&source_id).await?;
        let (healthy, notes) = if dir.root.exists() {
            (true, format!("root: {}", dir.root.display()))
        } else {
            (false, "root directory does not exist".to_string())
        };

        statuses.push(SourceStatus {
            chunks: counts.get(&source_id).copied().unwrap_or(0),
            name: source_id,
            healthy,
            notes: Some(notes),
            cursor_kind: cursor.as_ref().map(|c| c.cursor_kind).unwrap_or_default(),
            cursor: cursor.as_ref().and_then(|c| c.cursor_token.clone()),
            last_full_sync_at: cursor.as_ref().and_then(|c| c.last_full_sync_at),
            last_incremental_sync_at: cursor.as_ref().and_then(|c| c.last_incremental_sync_at),
        });
    }
    Ok(statuses)
}

/// `rcl sources`: print one line per configured source.
pub async fn list_sources(config: &Config) -> Result<()> {
    let sources = config.source_ids();
    if sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    let pool = crate::db::connect(config).await?;
    crate::migrate::migrate_pool(&pool).await?;
    let state = SqliteStateStore::new(pool.clone());
    let store = SqliteStore::new(pool.clone());
    let statuses = get_sources(config, &state, &store).await?;
    pool.close().await;

    println!(
        "{:<24} {:<8} {:<12} {:>8}  LAST SYNC",
        "SOURCE", "HEALTH", "CURSOR", "CHUNKS"
    );
    for s in &statuses {
        let last = s
            .last_incremental_sync_at
            .max(s.last_full_sync_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<24} {:<8} {:<12} {:>8}  {}",
            s.name,
            if s.healthy { "OK" } else { "MISSING" },
            s.cursor_kind.as_str(),
            s.chunks,
            last
        );
        if !s.healthy {
            if let Some(notes) = &s.notes {
                println!("  {}", notes);
            }
        }
    }
    Ok(())
}
