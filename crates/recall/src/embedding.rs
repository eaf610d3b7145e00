//! Embedding providers and retry policy.
//!
//! Implements [`recall_core::embedding::Embedder`] for the configured
//! provider:
//! - **`hash`**: [`HashEmbedder`], deterministic and offline (default).
//! - **`openai`**: [`OpenAIEmbedder`], `POST /v1/embeddings`.
//! - **`ollama`**: [`OllamaEmbedder`], `POST /api/embed` on a local Ollama.
//! - **`local`**: `LocalEmbedder`, in-process fastembed (requires the
//!   `local-embeddings` feature).
//!
//! Every provider pairs its dense vectors with the lexical
//! [`sparse_encode`] vector.
//!
//! # Retry Strategy
//!
//! Providers make exactly one request per call and classify the outcome:
//! - HTTP 429 (rate limited) and 5xx (server error) → [`EmbedError::Transient`]
//! - HTTP 4xx (client error, not 429) → [`EmbedError::Failed`]
//! - Network errors → [`EmbedError::Transient`]
//!
//! [`embed_with_retry`] retries transient errors with exponential backoff:
//! `retry_base_ms × 2^(attempt-1)`, the exponent capped at 5.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use recall_core::embedding::{sparse_encode, Embedder, Embedding, HashEmbedder};
use recall_core::error::EmbedError;

use crate::config::EmbeddingConfig;

/// Create the [`Embedder`] named by `embedding.provider`.
///
/// # Errors
///
/// Returns an error for unknown providers, missing model settings, a
/// missing `OPENAI_API_KEY`, or `local` without the feature compiled in.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims.unwrap_or(256)))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed `texts`, retrying transient failures.
///
/// Makes at most `max_retries + 1` attempts. A non-transient error is
/// returned immediately.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
    max_retries: u32,
    retry_base_ms: u64,
) -> Result<Vec<Embedding>, EmbedError> {
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let delay = Duration::from_millis(retry_base_ms.saturating_mul(1 << (attempt - 1).min(5)));
            tokio::time::sleep(delay).await;
        }

        match embedder.embed(texts).await {
            Ok(embeddings) if embeddings.len() == texts.len() => return Ok(embeddings),
            Ok(embeddings) => {
                return Err(EmbedError::Failed(format!(
                    "provider returned {} embeddings for {} inputs",
                    embeddings.len(),
                    texts.len()
                )))
            }
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    model = embedder.model_name(),
                    attempt,
                    max_retries,
                    error = %e,
                    "embedding failed, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Turn a dense batch into [`Embedding`]s, checking the dimensionality.
fn pair_with_sparse(
    texts: &[String],
    dense: Vec<Vec<f32>>,
    dims: usize,
) -> Result<Vec<Embedding>, EmbedError> {
    if dense.len() != texts.len() {
        return Err(EmbedError::Failed(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            dense.len()
        )));
    }
    if let Some(bad) = dense.iter().find(|v| v.len() != dims) {
        return Err(EmbedError::Failed(format!(
            "expected {} dimensions, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(texts
        .iter()
        .zip(dense)
        .map(|(t, d)| Embedding {
            dense: d,
            sparse: sparse_encode(t),
        })
        .collect())
}

/// Map an HTTP response to a parsed JSON body or a classified error.
async fn classify_response(
    provider: &str,
    resp: reqwest::Result<reqwest::Response>,
) -> Result<serde_json::Value, EmbedError> {
    let response = resp.map_err(|e| EmbedError::Transient(format!("{} request error: {}", provider, e)))?;
    let status = response.status();

    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| EmbedError::Transient(format!("{} response error: {}", provider, e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", provider, status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(EmbedError::Transient(message))
    } else {
        Err(EmbedError::Failed(message))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable. `embedding.url`
/// may point at an OpenAI-compatible gateway.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            dims,
            url,
            api_key,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        let json = classify_response("OpenAI", resp).await?;
        let dense = parse_openai_response(&json).map_err(|e| EmbedError::Failed(e.to_string()))?;
        pair_with_sparse(texts, dense, self.dims)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        let json = classify_response("Ollama", resp).await?;
        let dense = parse_ollama_response(&json).map_err(|e| EmbedError::Failed(e.to_string()))?;
        pair_with_sparse(texts, dense, self.dims)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// In-process embeddings via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached;
/// after that no network calls are made.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model(&model_name)?)
                .with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        let model = Arc::clone(&self.model);
        let batch = texts.to_vec();
        let batch_size = self.batch_size;

        let dense = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbedError::Failed("local model lock poisoned".to_string()))?;
            model
                .embed(batch, Some(batch_size))
                .map_err(|e| EmbedError::Failed(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| EmbedError::Failed(e.to_string()))??;

        pair_with_sparse(texts, dense, self.dims)
    }
}
