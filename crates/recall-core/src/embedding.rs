//! Embedder trait and vector utilities.
//!
//! Every chunk is indexed with two vectors: a dense embedding produced by
//! an [`Embedder`] and a sparse lexical vector produced by
//! [`sparse_encode`]. Network-backed providers (OpenAI, Ollama, fastembed)
//! live in the `recall` app crate; [`HashEmbedder`] is a deterministic,
//! offline provider used by tests and as the default configuration.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::EmbedError;
use crate::models::SparseVector;

/// Dense and sparse vectors for one input text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

/// Trait for embedding providers.
///
/// `embed` returns one [`Embedding`] per input, in input order. Providers
/// report [`EmbedError::Transient`] for failures worth retrying.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Dense vector dimensionality.
    fn dims(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError>;
}

/// Embed a single text.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Embedding, EmbedError> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::Failed("provider returned no embedding".to_string()))
}

/// Lowercase alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// 32-bit FNV-1a. Stable across platforms and releases, unlike `std`'s hasher.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Lexical sparse vector: hashed term ids weighted by `1 + ln(tf)`,
/// L2-normalized, indices ascending.
///
/// ```rust
/// use recall_core::embedding::{sparse_encode, sparse_dot};
///
/// let a = sparse_encode("kafka consumer lag");
/// let b = sparse_encode("Kafka lag");
/// assert!(sparse_dot(&a, &b) > 0.5);
/// assert!(sparse_encode("").is_empty());
/// ```
pub fn sparse_encode(text: &str) -> SparseVector {
    let mut tf: BTreeMap<u32, u32> = BTreeMap::new();
    for token in tokenize(text) {
        *tf.entry(fnv1a(token.as_bytes())).or_insert(0) += 1;
    }

    let weights: Vec<(u32, f32)> = tf
        .into_iter()
        .map(|(idx, n)| (idx, 1.0 + (n as f32).ln()))
        .collect();
    let norm = weights.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return SparseVector::default();
    }

    let (indices, values) = weights.into_iter().map(|(i, w)| (i, w / norm)).unzip();
    SparseVector { indices, values }
}

/// Dot product of two sparse vectors with ascending indices.
pub fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut dot = 0.0f32;
    while i < a.indices.len() && j < b.indices.len() {
        match a.indices[i].cmp(&b.indices[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a.values[i] * b.values[j];
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

/// Deterministic dense embedder based on signed feature hashing.
///
/// Texts sharing vocabulary land close together, which is enough for
/// offline use and tests. No model download or network access.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            model: format!("hash-{}", dims),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let slot = (h as usize) % self.dims;
            v[slot] += if h & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        Ok(texts
            .iter()
            .map(|t| Embedding {
                dense: self.embed_text(t),
                sparse: sparse_encode(t),
            })
            .collect())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use recall_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encode a sparse vector as `(u32 index, f32 value)` little-endian pairs.
pub fn sparse_to_blob(v: &SparseVector) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 8);
    for (i, w) in v.indices.iter().zip(&v.values) {
        bytes.extend_from_slice(&i.to_le_bytes());
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bytes
}

/// Reverse of [`sparse_to_blob`]. Trailing partial pairs are ignored.
pub fn sparse_from_blob(blob: &[u8]) -> SparseVector {
    let (indices, values) = blob
        .chunks_exact(8)
        .map(|p| {
            (
                u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                f32::from_le_bytes([p[4], p[5], p[6], p[7]]),
            )
        })
        .unzip();
    SparseVector { indices, values }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
