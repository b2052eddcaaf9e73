//! Document import: validate, persist, upload, enqueue.
//!
//! Import is the only writer that creates document records. A successful
//! import leaves the record in `Pending` with the raw bytes in the object
//! store and exactly one processing message on the queue. Validation
//! happens before any state is created; failures after record creation
//! roll the partial state back so a client retry starts clean.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::extract::is_supported;
use crate::idempotency::{idempotency_key, IdempotencyRegister};
use crate::index::VectorIndex;
use crate::models::{DocumentRecord, DocumentStatus, ProcessingMessage};
use crate::object_store::{object_key, ObjectStore};
use crate::queue::Queue;
use crate::ratelimit::RateLimiter;
use crate::store::DocumentStore;

/// Imports allowed per owner within the rate-limit window.
const IMPORTS_PER_WINDOW: u32 = 30;
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Receipt returned to the client after a successful import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReceipt {
    pub doc_id: String,
    pub status: DocumentStatus,
    pub message_id: String,
}

pub struct ImportService {
    store: DocumentStore,
    objects: Arc<dyn ObjectStore>,
    queue: Arc<dyn Queue>,
    index: Arc<dyn VectorIndex>,
    limiter: RateLimiter,
    max_file_bytes: i64,
}

impl ImportService {
    pub fn new(
        store: DocumentStore,
        objects: Arc<dyn ObjectStore>,
        queue: Arc<dyn Queue>,
        index: Arc<dyn VectorIndex>,
        max_file_bytes: i64,
    ) -> Self {
        Self {
            store,
            objects,
            queue,
            index,
            limiter: RateLimiter::new(IMPORTS_PER_WINDOW, RATE_WINDOW),
            max_file_bytes,
        }
    }

    /// Import a document and enqueue it for processing.
    pub async fn import(
        &self,
        owner_id: &str,
        name: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ImportReceipt> {
        if owner_id.trim().is_empty() {
            return Err(PipelineError::Validation("owner_id is required".into()));
        }
        if !self.limiter.try_acquire(owner_id) {
            return Err(PipelineError::Conflict(format!(
                "rate limit exceeded for owner {}",
                owner_id
            )));
        }
        if bytes.is_empty() {
            return Err(PipelineError::Validation("file is empty".into()));
        }
        if bytes.len() as i64 > self.max_file_bytes {
            return Err(PipelineError::Validation(format!(
                "file size {} exceeds {} byte limit",
                bytes.len(),
                self.max_file_bytes
            )));
        }
        if !is_supported(filename) {
            return Err(PipelineError::Validation(format!(
                "unsupported file type: {}",
                filename
            )));
        }

        let doc = DocumentRecord::new(owner_id, name, filename, bytes.len() as i64);
        self.store.insert(&doc).await?;

        match self.upload_and_enqueue(&doc, filename, bytes).await {
            Ok(message_id) => {
                tracing::info!(doc_id = %doc.id, owner_id, "document imported");
                Ok(ImportReceipt {
                    doc_id: doc.id,
                    status: DocumentStatus::Pending,
                    message_id,
                })
            }
            Err(e) => {
                // roll back the partial import so a retry starts clean
                let key = object_key(owner_id, &doc.id, filename);
                let _ = self.objects.delete(&key).await;
                let _ = self.store.delete(&doc.id).await;
                Err(e)
            }
        }
    }

    async fn upload_and_enqueue(
        &self,
        doc: &DocumentRecord,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let key = object_key(&doc.owner_id, &doc.id, filename);
        self.objects.put(&key, bytes).await?;

        if !self.store.set_status(&doc.id, DocumentStatus::Pending).await? {
            return Err(PipelineError::Conflict(format!(
                "document {} changed state during import",
                doc.id
            )));
        }

        let msg = ProcessingMessage::new(&doc.id, &doc.owner_id, &key, filename, doc.size_bytes);
        self.queue.send(msg).await
    }

    /// Idempotent import: a duplicate request under the same client token
    /// returns the original receipt instead of creating a second document.
    pub async fn import_idempotent(
        &self,
        register: &IdempotencyRegister<ImportReceipt>,
        client_token: &str,
        owner_id: &str,
        name: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ImportReceipt> {
        let key = idempotency_key(client_token, owner_id, bytes);
        register
            .execute(&key, || self.import(owner_id, name, filename, bytes))
            .await
    }

    /// Current status of an owner's document, or `None` if it does not
    /// exist (including documents that belong to someone else).
    pub async fn status(&self, owner_id: &str, doc_id: &str) -> Result<Option<DocumentStatus>> {
        Ok(self
            .store
            .get_owned(doc_id, owner_id)
            .await?
            .map(|d| d.status))
    }

    /// Remove a document: its vectors, stored object, and record.
    pub async fn delete(&self, owner_id: &str, doc_id: &str) -> Result<()> {
        let Some(doc) = self.store.get_owned(doc_id, owner_id).await? else {
            return Err(PipelineError::NotFound(format!("document {}", doc_id)));
        };
        self.index.delete_document(&doc.namespace, doc_id).await?;
        let key = object_key(&doc.owner_id, &doc.id, &doc.source_filename);
        self.objects.delete(&key).await?;
        self.store.delete(doc_id).await?;
        tracing::info!(doc_id, owner_id, "document deleted");
        Ok(())
    }
}
