//! Configuration parsing and validation.
//!
//! Recall is configured via a TOML file (default: `config/recall.toml`).
//! Every section except `[db]` is optional and falls back to the defaults
//! below.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/recall.sqlite"
//!
//! [chunking]
//! target_chars = 2000
//! overlap_chars = 200
//!
//! [tagging]
//! top_topics = 5
//!
//! [retrieval]
//! rrf_k = 60.0
//! candidate_multiplier = 4
//! final_limit = 10
//!
//! [embedding]
//! provider = "hash"        # hash | openai | ollama | local
//! dims = 256
//!
//! [sync]
//! lookback_days = 90
//! page_size = 200
//!
//! [connectors.dir.chats]
//! root = "./exports/chats"
//! include_globs = ["**/*.txt"]
//! kind = "chat"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use recall_core::chunk::ChunkerConfig;
use recall_core::search::SearchParams;
use recall_core::tag::TagConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Defaults to a tenth of `target_chars`.
    #[serde(default)]
    pub boundary_tolerance: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
            boundary_tolerance: None,
        }
    }
}

impl ChunkingConfig {
    pub fn chunker(&self) -> ChunkerConfig {
        let config = ChunkerConfig::new(self.target_chars, self.overlap_chars);
        match self.boundary_tolerance {
            Some(t) => config.with_tolerance(t),
            None => config,
        }
    }
}

fn default_target_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaggingConfig {
    #[serde(default = "default_top_topics")]
    pub top_topics: usize,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            top_topics: default_top_topics(),
        }
    }
}

impl TaggingConfig {
    pub fn tagger(&self) -> TagConfig {
        TagConfig {
            top_topics: self.top_topics,
        }
    }
}

fn default_top_topics() -> usize {
    recall_core::tag::DEFAULT_TOP_TOPICS
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            candidate_multiplier: default_candidate_multiplier(),
            final_limit: default_final_limit(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> SearchParams {
        SearchParams {
            rrf_k: self.rrf_k,
            candidate_multiplier: self.candidate_multiplier,
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_multiplier() -> usize {
    4
}
fn default_final_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Embedding batches in flight at once, per source.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_parallel_sources")]
    pub max_parallel_sources: usize,
    /// Blocking workers chunking and tagging documents, per source.
    #[serde(default = "default_prepare_workers")]
    pub prepare_workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            page_size: default_page_size(),
            max_parallel_sources: default_max_parallel_sources(),
            prepare_workers: default_prepare_workers(),
        }
    }
}

fn default_lookback_days() -> i64 {
    recall_core::cursor::DEFAULT_LOOKBACK_DAYS
}
fn default_page_size() -> usize {
    200
}
fn default_max_parallel_sources() -> usize {
    4
}
fn default_prepare_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    /// Named directory sources, exposed as `dir:<name>`.
    #[serde(default)]
    pub dir: BTreeMap<String, DirConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Free-form label copied into each document's provenance
    /// (`chat`, `mail`, `ocr`, `notes`).
    #[serde(default)]
    pub kind: Option<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.eml".to_string(),
    ]
}

impl Config {
    /// Source ids of every configured connector, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        self.connectors
            .dir
            .keys()
            .map(|name| format!("dir:{}", name))
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.target_chars == 0 {
        bail!("chunking.target_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.target_chars {
        bail!("chunking.overlap_chars must be smaller than chunking.target_chars");
    }

    if config.retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.candidate_multiplier < 1 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if config.retrieval.rrf_k.is_nan() || config.retrieval.rrf_k <= 0.0 {
        bail!("retrieval.rrf_k must be > 0");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "hash" => {}
        "openai" | "ollama" | "local" => {
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }
    if e.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if e.provider != "hash" && e.dims.is_none() {
        bail!("embedding.dims must be set when provider is '{}'", e.provider);
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if e.concurrency == 0 {
        bail!("embedding.concurrency must be > 0");
    }

    if config.sync.lookback_days < 1 {
        bail!("sync.lookback_days must be >= 1");
    }
    if config.sync.page_size == 0 {
        bail!("sync.page_size must be > 0");
    }
    if config.sync.max_parallel_sources == 0 || config.sync.prepare_workers == 0 {
        bail!("sync.max_parallel_sources and sync.prepare_workers must be > 0");
    }

    for (name, dir) in &config.connectors.dir {
        if name.is_empty() || name.contains(char::is_whitespace) {
            bail!("connector name '{}' must be non-empty without whitespace", name);
        }
        if dir.include_globs.is_empty() {
            bail!("connectors.dir.{}.include_globs must not be empty", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let text = format!("[db]\npath = \"/tmp/recall.sqlite\"\n{}", extra);
        let config: Config = toml::from_str(&text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let c = parse("").unwrap();
        assert_eq!(c.chunking.target_chars, 2000);
        assert_eq!(c.chunking.overlap_chars, 200);
        assert_eq!(c.chunking.chunker().boundary_tolerance, 200);
        assert_eq!(c.retrieval.params().rrf_k, 60.0);
        assert_eq!(c.retrieval.params().candidate_multiplier, 4);
        assert_eq!(c.embedding.provider, "hash");
        assert_eq!(c.sync.lookback_days, 90);
        assert!(c.source_ids().is_empty());
    }

    #[test]
    fn test_dir_connectors() {
        let c = parse(
            "[connectors.dir.chats]\nroot = \"/data/chats\"\nkind = \"chat\"\n\n[connectors.dir.mail]\nroot = \"/data/mail\"\ninclude_globs = [\"**/*.eml\"]\n",
        )
        .unwrap();
        assert_eq!(c.source_ids(), vec!["dir:chats", "dir:mail"]);
        assert_eq!(c.connectors.dir["chats"].include_globs.len(), 3);
        assert_eq!(c.connectors.dir["chats"].kind.as_deref(), Some("chat"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse("[chunking]\ntarget_chars = 0\n").is_err());
        assert!(parse("[chunking]\ntarget_chars = 100\noverlap_chars = 100\n").is_err());
        assert!(parse("[retrieval]\nrrf_k = 0.0\n").is_err());
        assert!(parse("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\ndims = 1536\n").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n").is_ok());
    }
}
