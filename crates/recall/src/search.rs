//! Search front end.
//!
//! Turns CLI flags into [`SearchFilters`], runs the core hybrid search
//! against the SQLite store and prints the fused results. The ranking
//! itself (two retrievals plus reciprocal rank fusion) lives in
//! `recall_core::search`.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use recall_core::models::Sentiment;
use recall_core::search::{SearchHit, SearchRequest};
use recall_core::store::{SearchFilters, TagFilter};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

/// Search options as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub source: Option<String>,
    pub person: Option<String>,
    pub project: Option<String>,
    pub topic: Option<String>,
    pub sentiment: Option<String>,
    pub decisions: bool,
    pub action_items: bool,
    /// `YYYY-MM-DD`, inclusive from the start of the day (UTC).
    pub since: Option<String>,
    /// `YYYY-MM-DD`, inclusive to the end of the day (UTC).
    pub until: Option<String>,
    pub limit: Option<usize>,
}

impl SearchOptions {
    pub fn filters(&self) -> Result<SearchFilters> {
        let mut tags = Vec::new();
        if let Some(p) = &self.person {
            tags.push(TagFilter::Person(p.clone()));
        }
        if let Some(p) = &self.project {
            tags.push(TagFilter::Project(p.clone()));
        }
        if let Some(t) = &self.topic {
            tags.push(TagFilter::Topic(t.clone()));
        }
        if let Some(s) = &self.sentiment {
            let sentiment: Sentiment = s.parse().map_err(anyhow::Error::msg)?;
            tags.push(TagFilter::Sentiment(sentiment));
        }
        if self.decisions {
            tags.push(TagFilter::HasDecision);
        }
        if self.action_items {
            tags.push(TagFilter::HasActionItem);
        }

        let source_id = self.source.as_ref().map(|s| {
            if s.contains(':') {
                s.clone()
            } else {
                format!("dir:{}", s)
            }
        });

        Ok(SearchFilters {
            source_id,
            tags,
            since: self.since.as_deref().map(start_of_day).transpose()?,
            until: self.until.as_deref().map(end_of_day).transpose()?,
        })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD", s))
}

fn start_of_day(s: &str) -> Result<DateTime<Utc>> {
    let date = parse_date(s)?;
    date.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .with_context(|| format!("Invalid date '{}'", s))
}

fn end_of_day(s: &str) -> Result<DateTime<Utc>> {
    let date = parse_date(s)?;
    date.and_hms_milli_opt(23, 59, 59, 999)
        .map(|t| t.and_utc())
        .with_context(|| format!("Invalid date '{}'", s))
}

/// Run a hybrid search against the configured index.
pub async fn search_chunks(
    config: &Config,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    let filters = options.filters()?;
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let embedder = create_embedder(&config.embedding)?;

    let request = SearchRequest {
        query: query.to_string(),
        filters,
        limit: options.limit.unwrap_or(config.retrieval.final_limit),
    };
    let hits = recall_core::search::search(
        &store,
        embedder.as_ref(),
        &request,
        &config.retrieval.params(),
    )
    .await?;

    pool.close().await;
    Ok(hits)
}

/// `rcl search`: print results, or JSON with `--json`.
pub async fn run_search(
    config: &Config,
    query: &str,
    options: &SearchOptions,
    json: bool,
) -> Result<()> {
    let hits = search_chunks(config, query, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let c = &hit.chunk;
        println!(
            "{}. [{:.4}] {} / {} ({}/{})",
            i + 1,
            hit.score,
            c.source_id,
            c.parent_external_id,
            c.chunk_index + 1,
            c.total_chunks
        );
        println!(
            "    ranks: dense={}  sparse={}",
            rank_label(hit.dense_rank),
            rank_label(hit.sparse_rank)
        );
        println!("    occurred: {}", c.occurred_at.format("%Y-%m-%d %H:%M"));
        if !c.tags.people.is_empty() {
            println!(
                "    people: {}",
                c.tags.people.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        if !c.tags.topics.is_empty() {
            println!("    topics: {}", c.tags.topics.join(", "));
        }
        println!("    excerpt: \"{}\"", excerpt(&c.text, 200));
        println!("    id: {}", c.chunk_id);
        println!();
    }

    Ok(())
}

fn rank_label(rank: Option<usize>) -> String {
    rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}…", &flat[..end]),
        None => flat,
    }
}
