//! Processing queue with at-least-once delivery.
//!
//! Messages become available after an optional delay; a received message is
//! hidden from other consumers for the visibility timeout and reappears if
//! it is not acknowledged in time. That redelivery mechanism is also the
//! pipeline's backpressure and retry substrate — there is no separate
//! cancellation path.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{PipelineError, Result};
use crate::models::ProcessingMessage;

/// A received message plus the receipt needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: String,
    pub message: ProcessingMessage,
}

/// At-least-once message queue with delayed re-delivery.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a message for immediate delivery. Returns a message id.
    async fn send(&self, msg: ProcessingMessage) -> Result<String>;

    /// Enqueue a message that becomes visible only after `delay`.
    async fn send_delayed(&self, msg: ProcessingMessage, delay: Duration) -> Result<String>;

    /// Receive the next visible message, if any. The message stays hidden
    /// from other consumers until acknowledged or the visibility timeout
    /// elapses.
    async fn receive(&self) -> Result<Option<Delivery>>;

    /// Acknowledge (delete) a received message.
    async fn ack(&self, receipt: &str) -> Result<()>;
}

// ============ In-process queue ============

struct Entry {
    id: u64,
    message: ProcessingMessage,
    available_at: Instant,
    in_flight_until: Option<Instant>,
}

/// In-process [`Queue`] implementation backed by a mutex-guarded list.
///
/// Suitable for single-node deployments and tests; the trait boundary is
/// where a distributed queue would plug in.
pub struct InProcessQueue {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
    visibility_timeout: Duration,
}

impl InProcessQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            visibility_timeout,
        }
    }

    /// Number of messages currently stored (visible or in flight).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enqueue(&self, msg: ProcessingMessage, delay: Duration) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap();
        entries.push(Entry {
            id,
            message: msg,
            available_at: Instant::now() + delay,
            in_flight_until: None,
        });
        id.to_string()
    }
}

#[async_trait]
impl Queue for InProcessQueue {
    async fn send(&self, msg: ProcessingMessage) -> Result<String> {
        Ok(self.enqueue(msg, Duration::ZERO))
    }

    async fn send_delayed(&self, msg: ProcessingMessage, delay: Duration) -> Result<String> {
        tracing::debug!(
            doc_id = %msg.doc_id,
            retry_count = msg.retry_count,
            delay_secs = delay.as_secs(),
            "enqueueing delayed message"
        );
        Ok(self.enqueue(msg, delay))
    }

    async fn receive(&self) -> Result<Option<Delivery>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            let visible = entry.available_at <= now
                && entry.in_flight_until.map_or(true, |until| until <= now);
            if visible {
                entry.in_flight_until = Some(now + self.visibility_timeout);
                return Ok(Some(Delivery {
                    receipt: entry.id.to_string(),
                    message: entry.message.clone(),
                }));
            }
        }
        Ok(None)
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        let id: u64 = receipt
            .parse()
            .map_err(|_| PipelineError::Validation(format!("invalid receipt: {}", receipt)))?;
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.id != id);
        Ok(())
    }
}
