//! Durable storage for raw imported file bytes.
//!
//! The import path uploads the original file here under a key derived from
//! owner, document id, and filename; the processing worker downloads it
//! again when a queue message arrives. [`FsObjectStore`] keeps objects on
//! the local filesystem; [`MemoryObjectStore`] backs tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;

use crate::error::{PipelineError, Result};

/// Content storage keyed by opaque string keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch object bytes. Missing keys are a permanent `NotFound` error.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Object key for an imported document: `{owner}/{doc_id}/{filename}`.
pub fn object_key(owner_id: &str, doc_id: &str, filename: &str) -> String {
    format!("{}/{}/{}", owner_id, doc_id, filename)
}

// ============ Filesystem store ============

/// Stores objects as files under a root directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // reject traversal segments; keys are owner/doc_id/filename
        if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(PipelineError::Validation(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Transient(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::NotFound(format!("object not found: {}", key)))
            }
            Err(e) => Err(PipelineError::Transient(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Transient(e.to_string())),
        }
    }
}

// ============ In-memory store ============

/// In-memory object store for tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| PipelineError::NotFound(format!("object not found: {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }
}
