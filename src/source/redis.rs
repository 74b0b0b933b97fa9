//! Redis list task source
//!
//! The front end `RPUSH`es descriptors onto a list. Receiving reads the head of
//! the list with `LRANGE` and deleting removes one matching entry with `LREM`, so
//! a descriptor stays in Redis until the dispatcher has enqueued it.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use super::{QueueMessage, TaskSource};
use crate::error::{DispatcherError, Result};

#[derive(Debug, Clone)]
pub struct RedisTaskSource {
    client: redis::Client,
    queue_name: String,
}

impl RedisTaskSource {
    pub fn new(url: &str, queue_name: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| DispatcherError::Configuration(format!("redis url: {e}")))?;
        Ok(Self {
            client,
            queue_name: queue_name.into(),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn connection(&self, operation: &str) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DispatcherError::source(operation, format!("redis connection failed: {e}")))
    }
}

#[async_trait]
impl TaskSource for RedisTaskSource {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut con = self.connection("receive").await?;
        let stop = isize::try_from(max).unwrap_or(isize::MAX) - 1;
        let entries: Vec<String> = con
            .lrange(&self.queue_name, 0, stop)
            .await
            .map_err(|e| DispatcherError::source("receive", e))?;

        debug!(queue = %self.queue_name, count = entries.len(), "Received descriptors");

        // Entries carry no id of their own; the content doubles as the delete handle
        Ok(entries
            .into_iter()
            .map(|content| QueueMessage {
                id: content.clone(),
                content,
            })
            .collect())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<()> {
        let mut con = self.connection("delete").await?;
        let removed: i64 = con
            .lrem(&self.queue_name, 1, &message.id)
            .await
            .map_err(|e| DispatcherError::source("delete", e))?;

        if removed == 0 {
            debug!(queue = %self.queue_name, "Descriptor already removed");
        }
        Ok(())
    }
}
