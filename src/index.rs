//! Vector index abstraction and implementations.
//!
//! All operations are namespace-scoped; a namespace is never consulted for
//! another owner's vectors. [`MemoryVectorIndex`] is a brute-force cosine
//! index for single-node deployments and tests; [`HttpVectorIndex`] speaks
//! a Pinecone-style REST API.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::embedding::cosine_similarity;
use crate::error::{PipelineError, Result};
use crate::models::{VectorMetadata, VectorRecord};

/// A match returned from a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredVector {
    pub id: String,
    pub score: f64,
    pub metadata: VectorMetadata,
}

/// Namespace-scoped vector store with similarity search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite vectors by id within a namespace.
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()>;

    /// Return up to `top_k` nearest vectors in the namespace, most similar
    /// first. `doc_id` restricts matches to a single document.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Result<Vec<ScoredVector>>;

    /// Remove every vector belonging to a document from the namespace.
    async fn delete_document(&self, namespace: &str, doc_id: &str) -> Result<()>;
}

/// Create the configured vector index.
pub fn create_index(config: &IndexConfig) -> Result<Box<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Box::new(MemoryVectorIndex::new())),
        "http" => Ok(Box::new(HttpVectorIndex::new(config)?)),
        other => Err(PipelineError::Validation(format!(
            "unknown index provider: {}",
            other
        ))),
    }
}

// ============ In-memory index ============

/// Brute-force cosine index keyed by namespace.
///
/// Scores are mapped from cosine similarity to `[0.0, 1.0]` by clamping
/// negatives to zero, matching what the retrieval threshold expects.
#[derive(Default)]
pub struct MemoryVectorIndex {
    namespaces: DashMap<String, Vec<VectorRecord>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total vectors stored in a namespace.
    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.namespaces.get(namespace).map_or(0, |v| v.len())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut entry = self.namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            if let Some(existing) = entry.iter_mut().find(|r| r.id == record.id) {
                *existing = record.clone();
            } else {
                entry.push(record.clone());
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Result<Vec<ScoredVector>> {
        let Some(records) = self.namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredVector> = records
            .iter()
            .filter(|r| doc_id.map_or(true, |d| r.metadata.doc_id == d))
            .map(|r| ScoredVector {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values).max(0.0) as f64,
                metadata: r.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_document(&self, namespace: &str, doc_id: &str) -> Result<()> {
        if let Some(mut records) = self.namespaces.get_mut(namespace) {
            records.retain(|r| r.metadata.doc_id != doc_id);
        }
        Ok(())
    }
}

// ============ HTTP index ============

/// Client for a Pinecone-style vector index API.
///
/// Writes are retried with exponential backoff up to the configured attempt
/// budget; queries and deletes make a single attempt and surface transient
/// errors to the caller's retry machinery.
pub struct HttpVectorIndex {
    base_url: String,
    upsert_attempts: u32,
    client: reqwest::Client,
}

impl HttpVectorIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| PipelineError::Validation("index.base_url required".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            upsert_attempts: config.upsert_attempts.max(1),
            client,
        })
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let msg = format!("index API error {} on {}: {}", status, path, text);
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(PipelineError::Transient(msg))
            } else {
                Err(PipelineError::Validation(msg))
            };
        }
        response.json().await.map_err(Into::into)
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({
            "namespace": namespace,
            "vectors": records,
        });

        let mut last_err = None;
        for attempt in 0..self.upsert_attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }
            match self.post_json("/vectors/upsert", &body).await {
                Ok(_) => return Ok(()),
                Err(e @ PipelineError::Validation(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "vector upsert failed");
                    last_err = Some(e);
                }
            }
        }
        Err(PipelineError::ExhaustedRetries {
            attempts: self.upsert_attempts,
            source: Box::new(
                last_err.unwrap_or_else(|| PipelineError::Transient("upsert failed".into())),
            ),
        })
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Result<Vec<ScoredVector>> {
        let mut body = serde_json::json!({
            "namespace": namespace,
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(d) = doc_id {
            body["filter"] = serde_json::json!({ "doc_id": { "$eq": d } });
        }

        let json = self.post_json("/query", &body).await?;
        parse_query_response(&json)
    }

    async fn delete_document(&self, namespace: &str, doc_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "namespace": namespace,
            "filter": { "doc_id": { "$eq": doc_id } },
        });
        self.post_json("/vectors/delete", &body).await?;
        Ok(())
    }
}

fn parse_query_response(json: &serde_json::Value) -> Result<Vec<ScoredVector>> {
    let matches = json
        .get("matches")
        .and_then(|m| m.as_array())
        .ok_or_else(|| PipelineError::Transient("invalid query response: missing matches".into()))?;

    let mut out = Vec::with_capacity(matches.len());
    for m in matches {
        let id = m
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PipelineError::Transient("invalid query response: missing id".into()))?;
        let score = m.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let metadata: VectorMetadata = m
            .get("metadata")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| PipelineError::Transient(format!("invalid match metadata: {}", e)))?
            .ok_or_else(|| {
                PipelineError::Transient("invalid query response: missing metadata".into())
            })?;
        out.push(ScoredVector {
            id: id.to_string(),
            score,
            metadata,
        });
    }
    Ok(out)
}
