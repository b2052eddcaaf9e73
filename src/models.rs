//! Core data types that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a document record.
///
/// Transitions only move forward: the first three are driven by the import
/// path before enqueueing, the rest by the processing state machine on
/// message consumption. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploading,
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// Forward-only transition table. `Processing -> Processing` is allowed
    /// so a duplicate in-flight delivery of the same message is benign.
    pub fn can_transition(self, to: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, to),
            (Uploading, Pending)
                | (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Retrying)
                | (Processing, Failed)
                | (Retrying, Processing)
                | (Retrying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Retrying => "retrying",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<DocumentStatus> {
        match s {
            "uploading" => Some(DocumentStatus::Uploading),
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "retrying" => Some(DocumentStatus::Retrying),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// An owner-submitted document tracked in SQLite.
///
/// `owner_id` and `namespace` are fixed at creation; `status` only moves
/// forward along the state machine. Records are created by the import path
/// and mutated only by the processing state machine afterwards.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub source_filename: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub namespace: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DocumentRecord {
    /// Create a fresh record in `Uploading` state. The namespace is derived
    /// from the owner and never changes afterwards.
    pub fn new(owner_id: &str, name: &str, source_filename: &str, size_bytes: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            description: None,
            source_filename: source_filename.to_string(),
            size_bytes,
            status: DocumentStatus::Uploading,
            namespace: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Queue message describing one processing attempt for a document.
///
/// `retry_count` is monotonically non-decreasing and bounded by the retry
/// budget; a retry re-creates the message with the count incremented.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingMessage {
    pub doc_id: String,
    pub owner_id: String,
    pub object_key: String,
    pub original_filename: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl ProcessingMessage {
    pub fn new(
        doc_id: &str,
        owner_id: &str,
        object_key: &str,
        original_filename: &str,
        file_size: i64,
    ) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            owner_id: owner_id.to_string(),
            object_key: object_key.to_string(),
            original_filename: original_filename.to_string(),
            file_size,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Typed metadata attached to every vector in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub owner_id: String,
    pub doc_id: String,
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub created_at: i64,
}

/// A vector record upserted into the index.
///
/// The id is deterministic given `(doc_id, chunk_index)` so reprocessing
/// the same document overwrites rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// Deterministic vector id for a document chunk.
pub fn vector_id(doc_id: &str, chunk_index: usize) -> String {
    format!("{}_chunk_{}", doc_id, chunk_index)
}

/// A scored chunk returned at query time. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub vector_id: String,
    pub text: String,
    pub score: f64,
    pub chunk_index: usize,
}
