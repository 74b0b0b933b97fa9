//! Task source poller
//!
//! Periodically drains a bounded batch of descriptors from the external queue into
//! the pending queue. A descriptor is deleted from the source only after it has been
//! enqueued locally; malformed descriptors are deleted and logged. Connectivity
//! failures are logged and retried on the next interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::TaskSource;
use crate::dispatch::DispatcherContext;
use crate::error::Result;
use crate::models::TaskDescriptor;

/// Counters for a single poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub fetched: usize,
    pub enqueued: usize,
    pub malformed: usize,
    pub delete_failures: usize,
}

/// Lifetime statistics of a poller
#[derive(Debug, Default)]
pub struct TaskSourcePollerStats {
    pub polling_cycles: AtomicU64,
    pub tasks_enqueued: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub polling_errors: AtomicU64,
}

pub struct TaskSourcePoller {
    poller_id: Uuid,
    source: Arc<dyn TaskSource>,
    context: Arc<DispatcherContext>,
    stats: TaskSourcePollerStats,
}

impl std::fmt::Debug for TaskSourcePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSourcePoller")
            .field("poller_id", &self.poller_id)
            .field("source", &self.source)
            .field("stats", &self.stats)
            .finish()
    }
}

impl TaskSourcePoller {
    pub fn new(source: Arc<dyn TaskSource>, context: Arc<DispatcherContext>) -> Self {
        Self {
            poller_id: Uuid::new_v4(),
            source,
            context,
            stats: TaskSourcePollerStats::default(),
        }
    }

    pub fn stats(&self) -> &TaskSourcePollerStats {
        &self.stats
    }

    /// Poll immediately, then every `poll_interval` until shutdown
    pub async fn run(self) {
        let poll_interval: Duration = self.context.config().poll_interval();
        let mut shutdown = self.context.shutdown_signal();
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poller_id = %self.poller_id,
            poll_interval = ?poll_interval,
            batch_size = self.context.config().poll_batch_size,
            "Starting task source poller"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }
            if !self.context.is_running() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                self.stats.polling_errors.fetch_add(1, Ordering::Relaxed);
                error!(poller_id = %self.poller_id, error = %e, "Failed to poll task source");
            }
        }

        info!(
            poller_id = %self.poller_id,
            polling_cycles = self.stats.polling_cycles.load(Ordering::Relaxed),
            tasks_enqueued = self.stats.tasks_enqueued.load(Ordering::Relaxed),
            "Task source poller stopped"
        );
    }

    /// Drain one batch from the source into the pending queue
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        self.stats.polling_cycles.fetch_add(1, Ordering::Relaxed);

        let batch_size = self.context.config().poll_batch_size;
        let messages = self.source.receive(batch_size).await?;
        let mut outcome = PollOutcome {
            fetched: messages.len(),
            ..PollOutcome::default()
        };

        for message in &messages {
            match TaskDescriptor::parse_queue_message(&message.content) {
                Ok(descriptor) => {
                    let task = self.context.enqueue(descriptor);
                    outcome.enqueued += 1;
                    debug!(task = %task, "Enqueued task from source");
                }
                Err(e) => {
                    outcome.malformed += 1;
                    warn!(
                        poller_id = %self.poller_id,
                        content = %message.content,
                        error = %e,
                        "Dropping malformed task descriptor"
                    );
                }
            }

            if let Err(e) = self.source.delete(message).await {
                outcome.delete_failures += 1;
                warn!(
                    poller_id = %self.poller_id,
                    message_id = %message.id,
                    error = %e,
                    "Failed to delete consumed descriptor from task source"
                );
            }
        }

        self.stats
            .tasks_enqueued
            .fetch_add(outcome.enqueued as u64, Ordering::Relaxed);
        self.stats
            .messages_dropped
            .fetch_add(outcome.malformed as u64, Ordering::Relaxed);

        if outcome.fetched > 0 {
            info!(
                poller_id = %self.poller_id,
                fetched = outcome.fetched,
                enqueued = outcome.enqueued,
                malformed = outcome.malformed,
                delete_failures = outcome.delete_failures,
                pending = self.context.pending().len(),
                "Task source poll complete"
            );
        }

        Ok(outcome)
    }
}
