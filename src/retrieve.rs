//! Top-k semantic retrieval over indexed document chunks.

use std::sync::Arc;

use crate::embedding::{embed_query, EmbeddingClient};
use crate::error::{PipelineError, Result};
use crate::index::VectorIndex;
use crate::models::ContextChunk;

/// A retrieval request. `top_k` and `score_threshold` fall back to the
/// configured defaults when unset.
#[derive(Debug, Clone)]
pub struct Query {
    pub owner_id: String,
    pub text: String,
    pub top_k: Option<usize>,
    pub score_threshold: Option<f64>,
    /// Restrict results to one document.
    pub doc_id: Option<String>,
}

impl Query {
    pub fn new(owner_id: &str, text: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            text: text.to_string(),
            top_k: None,
            score_threshold: None,
            doc_id: None,
        }
    }
}

pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    default_top_k: usize,
    default_threshold: f64,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        default_top_k: usize,
        default_threshold: f64,
    ) -> Self {
        Self {
            embedder,
            index,
            default_top_k,
            default_threshold,
        }
    }

    /// Return up to `top_k` chunks scoring at or above the threshold,
    /// ordered by score descending with chunk index as the tiebreaker.
    ///
    /// Matches with empty metadata text are dropped; an owner with no
    /// indexed documents gets an empty result, not an error.
    pub async fn retrieve(&self, query: &Query) -> Result<Vec<ContextChunk>> {
        if query.text.trim().is_empty() {
            return Err(PipelineError::Validation("query text is empty".into()));
        }
        let top_k = query.top_k.unwrap_or(self.default_top_k);
        if !(1..=100).contains(&top_k) {
            return Err(PipelineError::Validation(format!(
                "top_k must be in [1, 100], got {}",
                top_k
            )));
        }
        let threshold = query.score_threshold.unwrap_or(self.default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PipelineError::Validation(format!(
                "score_threshold must be in [0.0, 1.0], got {}",
                threshold
            )));
        }

        let vector = embed_query(self.embedder.as_ref(), &query.text).await?;
        let matches = self
            .index
            .query(&query.owner_id, &vector, top_k, query.doc_id.as_deref())
            .await?;

        let mut chunks: Vec<ContextChunk> = matches
            .into_iter()
            .filter(|m| m.score >= threshold && !m.metadata.text.trim().is_empty())
            .map(|m| ContextChunk {
                vector_id: m.id,
                text: m.metadata.text,
                score: m.score,
                chunk_index: m.metadata.chunk_index,
            })
            .collect();

        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        chunks.truncate(top_k);

        tracing::debug!(
            owner_id = %query.owner_id,
            matches = chunks.len(),
            top_k,
            threshold,
            "retrieval complete"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingClient;
    use crate::index::{MemoryVectorIndex, VectorIndex};
    use crate::models::{vector_id, VectorMetadata, VectorRecord};

    async fn engine_with_chunks(texts: &[&str]) -> RetrievalEngine {
        let embedder = Arc::new(MockEmbeddingClient::new(32));
        let index = Arc::new(MemoryVectorIndex::new());

        let vectors = embedder
            .embed(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        let records: Vec<VectorRecord> = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, values))| VectorRecord {
                id: vector_id("d1", i),
                values,
                metadata: VectorMetadata {
                    owner_id: "u1".into(),
                    doc_id: "d1".into(),
                    text: text.to_string(),
                    chunk_index: i,
                    total_chunks: texts.len(),
                    created_at: 0,
                },
            })
            .collect();
        index.upsert("u1", &records).await.unwrap();

        RetrievalEngine::new(embedder, index, 5, 0.7)
    }

    #[tokio::test]
    async fn exact_text_match_scores_highest() {
        let engine =
            engine_with_chunks(&["the sky is blue", "grass is green", "water is wet"]).await;

        let mut q = Query::new("u1", "grass is green");
        q.score_threshold = Some(0.0);
        let results = engine.retrieve(&q).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].text, "grass is green");
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn threshold_filters_weak_matches() {
        let engine = engine_with_chunks(&["alpha", "beta", "gamma"]).await;

        // identical text scores 1.0; unrelated hash vectors fall below 0.9
        let mut q = Query::new("u1", "alpha");
        q.score_threshold = Some(0.9);
        let results = engine.retrieve(&q).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "alpha");
    }

    #[tokio::test]
    async fn top_k_limits_result_count() {
        let engine = engine_with_chunks(&["one", "two", "three", "four", "five"]).await;

        let mut q = Query::new("u1", "one");
        q.top_k = Some(2);
        q.score_threshold = Some(0.0);
        let results = engine.retrieve(&q).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn empty_namespace_returns_empty() {
        let engine = engine_with_chunks(&["text"]).await;
        let mut q = Query::new("other-owner", "text");
        q.score_threshold = Some(0.0);
        let results = engine.retrieve(&q).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let engine = engine_with_chunks(&["text"]).await;
        let err = engine.retrieve(&Query::new("u1", "   ")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn out_of_range_parameters_are_rejected() {
        let engine = engine_with_chunks(&["text"]).await;

        let mut q = Query::new("u1", "text");
        q.top_k = Some(0);
        assert!(engine.retrieve(&q).await.is_err());

        let mut q = Query::new("u1", "text");
        q.top_k = Some(101);
        assert!(engine.retrieve(&q).await.is_err());

        let mut q = Query::new("u1", "text");
        q.score_threshold = Some(1.5);
        assert!(engine.retrieve(&q).await.is_err());
    }

    #[tokio::test]
    async fn ties_break_by_chunk_index() {
        // duplicate chunk text produces identical vectors and scores
        let engine = engine_with_chunks(&["same text", "same text"]).await;
        let mut q = Query::new("u1", "same text");
        q.score_threshold = Some(0.0);
        let results = engine.retrieve(&q).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].chunk_index < results[1].chunk_index);
    }
}
