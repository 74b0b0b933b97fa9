//! # Task Sources
//!
//! Adapters for the durable external queue the front end publishes task
//! descriptors to. Consumption is receive-then-delete: a message is removed from
//! the source only after the dispatcher has enqueued (or deliberately dropped) it.

pub mod poller;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{QueueBackend, QueueConfig};
use crate::error::{DispatcherError, Result};

pub use poller::{PollOutcome, TaskSourcePoller, TaskSourcePollerStats};
#[cfg(feature = "redis")]
pub use self::redis::RedisTaskSource;

/// A raw descriptor received from the external queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Backend-specific handle used to delete the message
    pub id: String,
    pub content: String,
}

/// Durable external queue of task descriptors
#[async_trait]
pub trait TaskSource: Send + Sync + std::fmt::Debug {
    /// Receive up to `max` messages without removing them
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>>;

    /// Remove a previously received message
    async fn delete(&self, message: &QueueMessage) -> Result<()>;
}

/// Build the task source a standalone dispatcher polls. The in-memory backend is
/// rejected here: outside the process nothing can publish to it.
pub fn from_config(queue: &QueueConfig) -> Result<Arc<dyn TaskSource>> {
    match queue.backend {
        QueueBackend::Memory => Err(DispatcherError::Configuration(
            "queue.backend: the memory backend only receives tasks pushed in-process; \
             use redis for a standalone dispatcher"
                .to_string(),
        )),
        QueueBackend::Redis => redis_source(queue),
    }
}

#[cfg(feature = "redis")]
fn redis_source(queue: &QueueConfig) -> Result<Arc<dyn TaskSource>> {
    let url = queue
        .url
        .as_deref()
        .ok_or_else(|| DispatcherError::Configuration("queue.url: required for the redis backend".to_string()))?;
    tracing::info!(queue = %queue.name, "Polling redis task queue");
    Ok(Arc::new(RedisTaskSource::new(url, queue.name.clone())?))
}

#[cfg(not(feature = "redis"))]
fn redis_source(_queue: &QueueConfig) -> Result<Arc<dyn TaskSource>> {
    Err(DispatcherError::Configuration(
        "queue.backend: redis requires building with the `redis` feature".to_string(),
    ))
}

/// Process-local queue for demos and tests
#[derive(Debug)]
pub struct InMemoryTaskSource {
    messages: Mutex<Vec<QueueMessage>>,
    next_id: AtomicU64,
    available: AtomicBool,
    deletes_fail: AtomicBool,
}

impl Default for InMemoryTaskSource {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            deletes_fail: AtomicBool::new(false),
        }
    }
}

impl InMemoryTaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a descriptor, as the front end would
    pub fn push(&self, content: impl Into<String>) -> QueueMessage {
        let message = QueueMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
            content: content.into(),
        };
        self.messages.lock().push(message.clone());
        message
    }

    /// Simulate losing connectivity; receive and delete fail while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make deletes fail while receives keep working
    pub fn set_deletes_fail(&self, fail: bool) {
        self.deletes_fail.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    fn ensure_available(&self, operation: &str) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DispatcherError::source(operation, "queue unavailable"))
        }
    }
}

#[async_trait]
impl TaskSource for InMemoryTaskSource {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>> {
        self.ensure_available("receive")?;
        Ok(self.messages.lock().iter().take(max).cloned().collect())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<()> {
        self.ensure_available("delete")?;
        if self.deletes_fail.load(Ordering::SeqCst) {
            return Err(DispatcherError::source("delete", "delete rejected"));
        }
        self.messages.lock().retain(|m| m.id != message.id);
        Ok(())
    }
}
