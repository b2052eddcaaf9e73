//! Idempotency register for client-retried imports.
//!
//! Keyed on a digest of the client token, owner, and request body, the
//! register guarantees an operation runs at most once per key within the
//! TTL: concurrent duplicates wait for the single in-flight execution and
//! receive its cached result. Failed executions are not cached, so a
//! client retry after an error gets a fresh attempt.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use crate::error::Result;

/// Idempotency key for a request: hex SHA-256 of token, owner, and body.
pub fn idempotency_key(client_token: &str, owner_id: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_token.as_bytes());
    hasher.update([0]);
    hasher.update(owner_id.as_bytes());
    hasher.update([0]);
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

struct Entry<T> {
    cell: Arc<OnceCell<T>>,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(expires_at: Instant) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            expires_at,
        }
    }
}

pub struct IdempotencyRegister<T> {
    entries: DashMap<String, Entry<T>>,
    ttl: Duration,
}

impl<T: Clone + Send + Sync + 'static> IdempotencyRegister<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Run `op` unless a successful result is already cached for `key`.
    ///
    /// Exactly one caller executes; the rest await the cell and clone the
    /// cached value. An error leaves nothing cached.
    pub async fn execute<F, Fut>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let now = Instant::now();
        let cell = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(now + self.ttl));
            if entry.expires_at <= now {
                *entry = Entry::new(now + self.ttl);
            }
            Arc::clone(&entry.cell)
        };

        match cell.get_or_try_init(op).await {
            Ok(value) => Ok(value.clone()),
            Err(e) => {
                // only evict if the key still refers to this failed cell
                self.entries
                    .remove_if(key, |_, en| Arc::ptr_eq(&en.cell, &cell) && en.cell.get().is_none());
                Err(e)
            }
        }
    }

    /// Drop expired entries.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically evict expired entries in a background task.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let register = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                register.sweep();
            }
        })
    }
}
