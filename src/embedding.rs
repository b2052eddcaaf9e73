//! Embedding client abstraction and implementations.
//!
//! The [`EmbeddingClient`] trait turns a batch of texts into fixed-length
//! vectors. Two implementations are provided:
//! - **[`HttpEmbeddingClient`]** — calls an OpenAI-style `/v1/embeddings`
//!   endpoint with retry and exponential backoff.
//! - **[`MockEmbeddingClient`]** — deterministic hash-derived vectors for
//!   tests and offline runs.
//!
//! # Retry Strategy
//!
//! HTTP 429 and 5xx responses and network errors are retried with
//! exponential backoff (1s, 2s, 4s, ... capped at 2^5); other 4xx
//! responses fail immediately as validation errors.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};

/// Turns text into fixed-length embedding vectors.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality produced by this client.
    fn dims(&self) -> usize;
}

/// Embed a single query text.
pub async fn embed_query(client: &dyn EmbeddingClient, text: &str) -> Result<Vec<f32>> {
    let results = client.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Transient("empty embedding response".into()))
}

// ============ HTTP client ============

/// Embedding client for an OpenAI-style embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct HttpEmbeddingClient {
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| PipelineError::Validation("embedding.model required".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| PipelineError::Validation("embedding.dims required".into()))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(PipelineError::Validation(
                "OPENAI_API_KEY environment variable not set".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PipelineError::Validation("OPENAI_API_KEY not set".into()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(PipelineError::Transient(format!(
                            "embedding API error {}: {}",
                            status, text
                        )));
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    return Err(PipelineError::Validation(format!(
                        "embedding API error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::Transient("embedding failed after retries".into())))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| PipelineError::Transient("invalid embedding response: missing data".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                PipelineError::Transient("invalid embedding response: missing embedding".into())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

// ============ Mock client ============

/// Deterministic embedding client for tests and offline pipelines.
///
/// Each text hashes to a fixed unit-length vector, so identical texts are
/// identical vectors (cosine similarity 1.0) and different texts diverge.
pub struct MockEmbeddingClient {
    dims: usize,
}

impl MockEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dims);
        let mut counter: u32 = 0;
        while values.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks_exact(4) {
                if values.len() == self.dims {
                    break;
                }
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // map to [-1, 1]
                values.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

impl Default for MockEmbeddingClient {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Create the configured embedding client.
pub fn create_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "mock" => Ok(Box::new(MockEmbeddingClient::new(config.dims.unwrap_or(64)))),
        "openai" => Ok(Box::new(HttpEmbeddingClient::new(config)?)),
        other => Err(PipelineError::Validation(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Vector math ============

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors or mismatched lengths.
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
