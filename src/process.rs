//! Queue-driven document processing.
//!
//! The processor consumes [`ProcessingMessage`]s and drives each document
//! through download, extraction, chunking, embedding, and index upsert,
//! recording progress in the status state machine. Failures split on one
//! bit: permanent errors fail the document immediately, transient errors
//! consume one unit of retry budget and re-enqueue the message with an
//! exponentially growing delay. The retry budget and base delay come from
//! [`ProcessingConfig`](crate::config::ProcessingConfig).
//!
//! Every message is acknowledged exactly once, on every path, so the queue
//! never redelivers a message the processor has already resolved.

use std::sync::Arc;
use std::time::Duration;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::{PipelineError, Result};
use crate::extract::TextExtractor;
use crate::index::VectorIndex;
use crate::models::{
    vector_id, DocumentStatus, ProcessingMessage, VectorMetadata, VectorRecord,
};
use crate::object_store::ObjectStore;
use crate::queue::{Delivery, Queue};
use crate::store::DocumentStore;

/// What to do with a message after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue with the given delay and an incremented retry count.
    Retry(Duration),
    /// Budget exhausted; fail the document.
    GiveUp,
}

/// Decide whether a failed attempt gets another try.
///
/// Delays double per attempt: `base`, `2*base`, `4*base`, ...
pub fn retry_decision(retry_count: u32, max_retries: u32, base_delay: Duration) -> RetryDecision {
    if retry_count >= max_retries {
        return RetryDecision::GiveUp;
    }
    let factor = 1u32 << retry_count.min(16);
    RetryDecision::Retry(base_delay * factor)
}

/// Outcome of handling a single delivery. Always ends with an ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    /// Document was already terminal or missing; the message was dropped.
    Skipped,
    Retried,
    Failed,
}

pub struct Processor {
    store: DocumentStore,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    queue: Arc<dyn Queue>,
    max_chunk_chars: usize,
    overlap_chars: usize,
    max_retries: u32,
    base_delay: Duration,
    batch_size: usize,
    op_timeout: Duration,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        store: DocumentStore,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        queue: Arc<dyn Queue>,
    ) -> Self {
        Self {
            store,
            objects,
            extractor,
            embedder,
            index,
            queue,
            max_chunk_chars: config.chunking.max_chars,
            overlap_chars: config.chunking.overlap_chars,
            max_retries: config.processing.max_retries,
            base_delay: Duration::from_secs(config.processing.base_delay_secs),
            batch_size: config.processing.batch_size,
            op_timeout: Duration::from_secs(config.processing.op_timeout_secs),
        }
    }

    /// Handle one delivery end to end, including the final ack.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<ProcessOutcome> {
        let msg = &delivery.message;
        tracing::info!(
            doc_id = %msg.doc_id,
            retry_count = msg.retry_count,
            "processing message"
        );

        let outcome = match self.check_startable(msg).await? {
            Startable::No => ProcessOutcome::Skipped,
            Startable::Yes => match self.process(msg).await {
                Ok(()) => {
                    self.store
                        .set_status(&msg.doc_id, DocumentStatus::Completed)
                        .await?;
                    tracing::info!(doc_id = %msg.doc_id, "document completed");
                    ProcessOutcome::Completed
                }
                Err(e) if e.is_retryable() => self.handle_retryable(msg, &e).await?,
                Err(e) => {
                    tracing::warn!(doc_id = %msg.doc_id, error = %e, "permanent failure");
                    self.fail_document(msg).await?;
                    ProcessOutcome::Failed
                }
            },
        };

        self.queue.ack(&delivery.receipt).await?;
        Ok(outcome)
    }

    /// Move the document into `Processing`, or decide the message should be
    /// dropped. Terminal and missing documents are skipped so duplicate
    /// deliveries after completion are benign.
    async fn check_startable(&self, msg: &ProcessingMessage) -> Result<Startable> {
        let Some(doc) = self.store.get_owned(&msg.doc_id, &msg.owner_id).await? else {
            tracing::warn!(doc_id = %msg.doc_id, "message for unknown document, dropping");
            return Ok(Startable::No);
        };
        if doc.status.is_terminal() {
            tracing::info!(
                doc_id = %msg.doc_id,
                status = doc.status.as_str(),
                "document already terminal, dropping duplicate delivery"
            );
            return Ok(Startable::No);
        }
        if !self
            .store
            .set_status(&msg.doc_id, DocumentStatus::Processing)
            .await?
        {
            return Ok(Startable::No);
        }
        Ok(Startable::Yes)
    }

    /// The happy path: download, extract, chunk, embed, upsert.
    async fn process(&self, msg: &ProcessingMessage) -> Result<()> {
        let bytes = self
            .with_timeout(self.objects.get(&msg.object_key))
            .await?;

        let text = self.extractor.extract(&bytes, &msg.original_filename)?;
        let chunks = chunk_text(&text, self.max_chunk_chars, self.overlap_chars);
        if chunks.is_empty() {
            return Err(PipelineError::Validation(
                "no text content found in file".into(),
            ));
        }
        let total_chunks = chunks.len();
        tracing::debug!(doc_id = %msg.doc_id, chunks = total_chunks, "chunked document");

        let created_at = chrono::Utc::now().timestamp();
        for (batch_start, batch) in chunks
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, b)| (i * self.batch_size, b))
        {
            let embeddings = self.with_timeout(self.embedder.embed(batch)).await?;
            if embeddings.len() != batch.len() {
                return Err(PipelineError::Transient(format!(
                    "embedding count mismatch: {} texts, {} vectors",
                    batch.len(),
                    embeddings.len()
                )));
            }

            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(embeddings)
                .enumerate()
                .map(|(offset, (chunk, values))| {
                    let chunk_index = batch_start + offset;
                    VectorRecord {
                        id: vector_id(&msg.doc_id, chunk_index),
                        values,
                        metadata: VectorMetadata {
                            owner_id: msg.owner_id.clone(),
                            doc_id: msg.doc_id.clone(),
                            text: chunk.clone(),
                            chunk_index,
                            total_chunks,
                            created_at,
                        },
                    }
                })
                .collect();

            self.with_timeout(self.index.upsert(&msg.owner_id, &records))
                .await?;
        }

        Ok(())
    }

    async fn handle_retryable(
        &self,
        msg: &ProcessingMessage,
        err: &PipelineError,
    ) -> Result<ProcessOutcome> {
        match retry_decision(msg.retry_count, self.max_retries, self.base_delay) {
            RetryDecision::Retry(delay) => {
                tracing::warn!(
                    doc_id = %msg.doc_id,
                    retry_count = msg.retry_count,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "transient failure, scheduling retry"
                );
                self.store
                    .set_status(&msg.doc_id, DocumentStatus::Retrying)
                    .await?;
                let mut retry = msg.clone();
                retry.retry_count += 1;
                self.queue.send_delayed(retry, delay).await?;
                Ok(ProcessOutcome::Retried)
            }
            RetryDecision::GiveUp => {
                tracing::error!(
                    doc_id = %msg.doc_id,
                    attempts = msg.retry_count + 1,
                    error = %err,
                    "retry budget exhausted, failing document"
                );
                self.fail_document(msg).await?;
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    /// Mark the document failed. Vectors from partial attempts are left in
    /// place; they are removed only when the document itself is deleted.
    async fn fail_document(&self, msg: &ProcessingMessage) -> Result<()> {
        self.store
            .set_status(&msg.doc_id, DocumentStatus::Failed)
            .await?;
        Ok(())
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| {
                PipelineError::Transient(format!(
                    "operation timed out after {}s",
                    self.op_timeout.as_secs()
                ))
            })?
    }

    /// Process available messages until the queue yields nothing. Delayed
    /// retries whose delay has not elapsed are not waited for.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while let Some(delivery) = self.queue.receive().await? {
            self.handle_delivery(delivery).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Run a polling worker pool until the task is cancelled.
    pub async fn run(self: Arc<Self>, workers: usize) -> Result<()> {
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let processor = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                loop {
                    match processor.queue.receive().await {
                        Ok(Some(delivery)) => {
                            if let Err(e) = processor.handle_delivery(delivery).await {
                                tracing::error!(worker_id, error = %e, "delivery handling failed");
                            }
                        }
                        Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                        Err(e) => {
                            tracing::error!(worker_id, error = %e, "queue receive failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| PipelineError::Transient(format!("worker panicked: {}", e)))?;
        }
        Ok(())
    }
}

enum Startable {
    Yes,
    No,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let base = Duration::from_secs(60);
        assert_eq!(
            retry_decision(0, 3, base),
            RetryDecision::Retry(Duration::from_secs(60))
        );
        assert_eq!(
            retry_decision(1, 3, base),
            RetryDecision::Retry(Duration::from_secs(120))
        );
        assert_eq!(
            retry_decision(2, 3, base),
            RetryDecision::Retry(Duration::from_secs(240))
        );
    }

    #[test]
    fn budget_exhaustion_gives_up() {
        let base = Duration::from_secs(60);
        assert_eq!(retry_decision(3, 3, base), RetryDecision::GiveUp);
        assert_eq!(retry_decision(7, 3, base), RetryDecision::GiveUp);
    }

    #[test]
    fn zero_budget_never_retries() {
        assert_eq!(
            retry_decision(0, 0, Duration::from_secs(60)),
            RetryDecision::GiveUp
        );
    }
}
