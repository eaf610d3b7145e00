//! Directory source adapter (`dir:<name>`).
//!
//! Exposes a directory of exported text (chat transcripts, OCR dumps,
//! saved mail) as a [`SourceAdapter`]. Files are selected with include and
//! exclude globs relative to the root, and keyed by that relative path.
//!
//! - **Cursor**: the newest modification time seen, in unix seconds.
//!   `list_since` returns files modified in or after that second, so a
//!   file written during a pass is picked up by the next one.
//! - **Pages**: resume after the last path delivered, in sorted path
//!   order, so files removed mid-listing never shift later pages. The
//!   cursor is computed once, on the first page, from the selected files.
//! - **Deletions**: every page carries the full manifest of live paths.
//! - Files that are not valid UTF-8 are reported as rejected.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use recall_core::error::{MalformedDocument, SourceError};
use recall_core::models::RawDocument;
use recall_core::source::{SourceAdapter, SourcePage};

use crate::config::DirConnectorConfig;

/// Which files a page should return.
#[derive(Debug, Clone, Copy)]
enum Window {
    ChangedSince(i64),
    OccurredSince(Option<DateTime<Utc>>),
}

#[derive(Debug, Clone)]
struct FileEntry {
    relative: String,
    path: PathBuf,
    modified: DateTime<Utc>,
}

pub struct DirSource {
    source_id: String,
    root: PathBuf,
    kind: Option<String>,
    follow_symlinks: bool,
    page_size: usize,
    include: Arc<GlobSet>,
    exclude: Arc<GlobSet>,
}

impl DirSource {
    pub fn new(name: &str, config: &DirConnectorConfig, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            bail!("page size must be > 0");
        }
        let include = build_globset(&config.include_globs)?;

        let mut excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            source_id: format!("dir:{}", name),
            root: config.root.clone(),
            kind: config.kind.clone(),
            follow_symlinks: config.follow_symlinks,
            page_size,
            include: Arc::new(include),
            exclude: Arc::new(exclude),
        })
    }

    async fn page(&self, window: Window, page_token: Option<&str>) -> Result<SourcePage, SourceError> {
        let resume = page_token.map(PageToken::parse).transpose()?;

        let source_id = self.source_id.clone();
        let root = self.root.clone();
        let kind = self.kind.clone();
        let follow = self.follow_symlinks;
        let page_size = self.page_size;
        let include = Arc::clone(&self.include);
        let exclude = Arc::clone(&self.exclude);

        tokio::task::spawn_blocking(move || {
            let files = scan(&root, follow, &include, &exclude)
                .map_err(|e| SourceError::Transient(format!("{}: {:#}", source_id, e)))?;

            let selected: Vec<&FileEntry> = files.iter().filter(|f| window.admits(f)).collect();

            // Fixed on the first page; later pages carry it in the token.
            let cursor = match &resume {
                Some(token) => token.cursor,
                None => selected
                    .iter()
                    .map(|f| f.modified.timestamp())
                    .max()
                    .unwrap_or_else(|| window.floor()),
            };

            let remaining: Vec<&FileEntry> = match &resume {
                Some(token) => selected
                    .into_iter()
                    .filter(|f| f.relative.as_str() > token.after.as_str())
                    .collect(),
                None => selected,
            };
            let batch = &remaining[..page_size.min(remaining.len())];
            let next_page_token = if remaining.len() > batch.len() {
                batch.last().map(|f| {
                    PageToken {
                        cursor,
                        after: f.relative.clone(),
                    }
                    .encode()
                })
            } else {
                None
            };

            let mut page = SourcePage {
                live_ids: Some(files.iter().map(|f| f.relative.clone()).collect()),
                next_page_token,
                cursor: cursor.to_string(),
                ..SourcePage::default()
            };

            for entry in batch {
                match read_document(&source_id, kind.as_deref(), entry) {
                    Ok(doc) => page.documents.push(doc),
                    Err(rejected) => page.rejected.push(rejected),
                }
            }

            tracing::debug!(
                source = %source_id,
                after = resume.as_ref().map(|t| t.after.as_str()).unwrap_or(""),
                documents = page.documents.len(),
                rejected = page.rejected.len(),
                "listed directory page"
            );
            Ok(page)
        })
        .await
        .map_err(|e| SourceError::Transient(e.to_string()))?
    }
}

impl Window {
    fn admits(&self, file: &FileEntry) -> bool {
        match *self {
            Window::ChangedSince(secs) => file.modified.timestamp() >= secs,
            Window::OccurredSince(Some(since)) => file.modified >= since,
            Window::OccurredSince(None) => true,
        }
    }

    /// Cursor to hand back when the window selects nothing.
    fn floor(&self) -> i64 {
        match *self {
            Window::ChangedSince(previous) => previous,
            Window::OccurredSince(Some(since)) => since.timestamp(),
            Window::OccurredSince(None) => 0,
        }
    }
}

/// Resume point of a listing: the cursor computed on its first page and
/// the last relative path delivered so far. Encoded as `<cursor>:<path>`.
#[derive(Debug, Clone, PartialEq)]
struct PageToken {
    cursor: i64,
    after: String,
}

impl PageToken {
    fn parse(token: &str) -> Result<Self, SourceError> {
        token
            .split_once(':')
            .and_then(|(cursor, after)| {
                Some(Self {
                    cursor: cursor.parse().ok()?,
                    after: after.to_string(),
                })
            })
            .ok_or_else(|| SourceError::Transient(format!("invalid page token '{}'", token)))
    }

    fn encode(&self) -> String {
        format!("{}:{}", self.cursor, self.after)
    }
}

#[async_trait]
impl SourceAdapter for DirSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn list_since(
        &self,
        cursor: &str,
        page_token: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        let secs = cursor
            .parse::<i64>()
            .map_err(|_| SourceError::CursorExpired {
                source_id: self.source_id.clone(),
            })?;
        self.page(Window::ChangedSince(secs), page_token).await
    }

    async fn list_full(
        &self,
        since: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        self.page(Window::OccurredSince(since), page_token).await
    }
}

/// Every matching file under `root`, sorted by relative path.
fn scan(root: &Path, follow_symlinks: bool, include: &GlobSet, exclude: &GlobSet) -> Result<Vec<FileEntry>> {
    if !root.exists() {
        bail!("directory root does not exist: {}", root.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }

        let modified = entry
            .metadata()?
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        files.push(FileEntry {
            relative: rel_str,
            path: path.to_path_buf(),
            modified: DateTime::<Utc>::from(modified),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn read_document(
    source_id: &str,
    kind: Option<&str>,
    entry: &FileEntry,
) -> Result<RawDocument, MalformedDocument> {
    let bytes = std::fs::read(&entry.path)
        .map_err(|e| MalformedDocument::new(source_id, &entry.relative, format!("unreadable: {}", e)))?;
    let digest = format!("{:x}", Sha256::digest(&bytes));
    let size = bytes.len();
    let raw_text = String::from_utf8(bytes)
        .map_err(|_| MalformedDocument::new(source_id, &entry.relative, "not valid UTF-8"))?;

    Ok(RawDocument {
        source_id: source_id.to_string(),
        external_id: entry.relative.clone(),
        raw_text,
        occurred_at: entry.modified,
        provenance: serde_json::json!({
            "path": entry.path.display().to_string(),
            "kind": kind,
            "sha256": digest,
            "bytes": size,
        }),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
