//! Boundary-aware text chunker with overlap.
//!
//! Splits document text into [`ChunkSpan`]s bounded by a target size.
//! Breaks prefer logical unit boundaries (paragraphs, chat turns, mail
//! headers) over mid-sentence splits, and consecutive chunks overlap so
//! that context spanning a break is not lost.
//!
//! Each chunk of a document receives a deterministic id derived from its
//! source, external id and index, plus a SHA-256 hash of its text. Running
//! the chunker twice over the same document yields identical chunks.
//!
//! # Algorithm
//!
//! 1. Text no longer than `target_size` becomes a single chunk; empty or
//!    whitespace-only text yields none.
//! 2. Otherwise, starting at `start`, the latest acceptable break is
//!    searched in the window `[start + target - tolerance, start + target]`,
//!    in order of preference:
//!    - the start of a logical unit (after a blank line, or a line opening
//!      with a speaker label, timestamp or mail header),
//!    - the start of any line,
//!    - the end of a sentence,
//!    - any whitespace,
//!    - finally a hard split on the nearest char boundary.
//! 3. The next chunk starts `overlap_size` bytes before the previous end.
//!
//! All sizes and ranges are byte offsets snapped to UTF-8 char boundaries.
//!
//! # Example
//!
//! ```rust
//! use recall_core::chunk::{chunk, ChunkerConfig};
//!
//! let spans = chunk("Hello world.\n\nSecond paragraph.", &ChunkerConfig::new(2000, 200));
//! assert_eq!(spans.len(), 1);
//! assert_eq!(spans[0].total, 1);
//! ```

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, RawDocument, Tags};

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum bytes per chunk.
    pub target_size: usize,
    /// Bytes repeated from the tail of one chunk at the head of the next.
    pub overlap_size: usize,
    /// How far before `target_size` a boundary may be to still be preferred
    /// over a hard split.
    pub boundary_tolerance: usize,
}

impl ChunkerConfig {
    /// Config with the default tolerance of a tenth of the target size.
    pub fn new(target_size: usize, overlap_size: usize) -> Self {
        Self {
            target_size,
            overlap_size,
            boundary_tolerance: target_size / 10,
        }
    }

    pub fn with_tolerance(mut self, boundary_tolerance: usize) -> Self {
        self.boundary_tolerance = boundary_tolerance;
        self
    }
}

/// A chunk before it is attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub total: usize,
    pub range: Range<usize>,
    pub text: String,
}

/// Split `text` into overlapping spans.
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields no spans.
/// - Indices are contiguous `0..N` and every span carries `total = N`.
/// - The first span starts at 0, the last ends at `text.len()`, and each
///   span starts at or before the end of the previous one.
/// - No span is longer than `target_size`, except when trailing whitespace
///   is folded into the final span.
pub fn chunk(text: &str, config: &ChunkerConfig) -> Vec<ChunkSpan> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let target = config.target_size.max(1);
    let len = text.len();
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut start = 0usize;

    loop {
        if start + target >= len {
            ranges.push(start..len);
            break;
        }

        let mut end = find_break(text, start, target, config.boundary_tolerance);
        if text[end..].trim().is_empty() {
            end = len;
        }
        ranges.push(start..end);
        if end >= len {
            break;
        }

        let next = snap_to_char_boundary(text, end.saturating_sub(config.overlap_size));
        start = if next > start { next } else { end };
    }

    let total = ranges.len();
    ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| ChunkSpan {
            index,
            total,
            text: text[range.clone()].to_string(),
            range,
        })
        .collect()
}

/// Chunk a raw document into untagged [`Chunk`]s.
pub fn chunk_document(doc: &RawDocument, config: &ChunkerConfig) -> Vec<Chunk> {
    chunk(&doc.raw_text, config)
        .into_iter()
        .map(|span| Chunk {
            chunk_id: chunk_id(&doc.source_id, &doc.external_id, span.index),
            source_id: doc.source_id.clone(),
            parent_external_id: doc.external_id.clone(),
            chunk_index: span.index,
            total_chunks: span.total,
            hash: content_hash(&span.text),
            text: span.text,
            char_range: span.range,
            tags: Tags::default(),
            occurred_at: doc.occurred_at,
        })
        .collect()
}

/// Deterministic chunk identity: a UUID built from the first 16 bytes of
/// `SHA-256(source_id ␟ external_id ␟ index)`.
pub fn chunk_id(source_id: &str, external_id: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(external_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update((index as u64).to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// SHA-256 of a chunk's text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Pick the end of the chunk that starts at `start`.
fn find_break(text: &str, start: usize, target: usize, tolerance: usize) -> usize {
    let mut hi = snap_to_char_boundary(text, start + target);
    if hi <= start {
        hi = next_char_boundary(text, start);
    }
    let lo = hi.saturating_sub(tolerance).max(start + 1);

    let tests: [fn(&str, usize) -> bool; 4] = [is_unit_start, is_line_start, is_sentence_end, is_space];
    for test in tests {
        if let Some(p) = (lo..=hi).rev().find(|&p| test(text, p)) {
            return p;
        }
    }
    hi
}

fn turn_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:\[[0-9:./\- ]+(?:[AaPp][Mm])?\]\s*|(?:From|To|Cc|Subject|Date|Sent):\s|On .{1,120} wrote:|-{3,}|[A-Z][\w.'\- ]{0,40}:\s)",
        )
        .expect("turn marker pattern is valid")
    })
}

/// `p` begins a paragraph or a message/turn.
fn is_unit_start(text: &str, p: usize) -> bool {
    if !is_line_start(text, p) {
        return false;
    }
    let before = text[..p - 1].trim_end_matches([' ', '\t', '\r']);
    if before.ends_with('\n') {
        return true;
    }
    let line_end = text[p..].find('\n').map(|i| p + i).unwrap_or(text.len());
    turn_marker().is_match(&text[p..line_end])
}

fn is_line_start(text: &str, p: usize) -> bool {
    p > 0 && p < text.len() && text.as_bytes()[p - 1] == b'\n'
}

fn is_sentence_end(text: &str, p: usize) -> bool {
    let bytes = text.as_bytes();
    p >= 2
        && p < text.len()
        && bytes[p - 1].is_ascii_whitespace()
        && matches!(bytes[p - 2], b'.' | b'!' | b'?')
}

fn is_space(text: &str, p: usize) -> bool {
    p > 0 && p < text.len() && text.as_bytes()[p - 1].is_ascii_whitespace()
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| index + i)
        .unwrap_or(s.len())
}
