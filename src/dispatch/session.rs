//! # Dispatch Loop
//!
//! Drives one worker connection through the assignment protocol:
//!
//! ```text
//! AwaitingTask → TaskSent → AwaitingResult → Completed → AwaitingTask
//!                                          ↘ Failed → Terminated
//! ```
//!
//! Every failure path (empty reply, `ERROR`, read/write error, timeout) ends in
//! [`DispatchSession::terminate`], which returns any outstanding task to the front
//! of the pending queue before the session leaves the active set.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::context::{DispatcherContext, Reassignment};
use super::protocol::{decode_reply, encode_task, WorkerReply, NO_TASK};
use crate::logging::log_task_operation;
use crate::models::{Task, WorkerStatus};

/// Protocol state of a dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingTask,
    TaskSent,
    AwaitingResult,
    Completed,
    Failed,
    Terminated,
}

/// Why a dispatch loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Running flag cleared while awaiting a task
    Shutdown,
    /// A newer connection registered under the same peer address
    Replaced,
    /// Zero-byte read, including an orderly peer close
    EmptyReply,
    /// Worker answered `ERROR`
    ErrorReply,
    ReadFailed(String),
    WriteFailed(String),
    /// No reply within the configured result timeout
    TimedOut,
}

impl TerminationReason {
    /// Whether the session ended because the worker misbehaved or went away
    pub fn is_failure(&self) -> bool {
        !matches!(self, TerminationReason::Shutdown)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Shutdown => f.write_str("dispatcher shutting down"),
            TerminationReason::Replaced => f.write_str("replaced by a newer session"),
            TerminationReason::EmptyReply => f.write_str("empty reply from worker"),
            TerminationReason::ErrorReply => f.write_str("worker reported ERROR"),
            TerminationReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            TerminationReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            TerminationReason::TimedOut => f.write_str("timed out waiting for result"),
        }
    }
}

/// One worker connection and its protocol state
pub struct DispatchSession {
    worker_id: String,
    /// Set on registration
    token: Uuid,
    stream: TcpStream,
    context: Arc<DispatcherContext>,
    state: SessionState,
}

impl DispatchSession {
    pub fn new(worker_id: impl Into<String>, stream: TcpStream, context: Arc<DispatcherContext>) -> Self {
        Self {
            worker_id: worker_id.into(),
            token: Uuid::nil(),
            stream,
            context,
            state: SessionState::AwaitingTask,
        }
    }

    /// Run the dispatch loop until the worker fails or the dispatcher shuts down
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn run(mut self) -> TerminationReason {
        self.token = self.context.register_session(&self.worker_id);
        self.context
            .reporter()
            .worker_status(&self.worker_id, &WorkerStatus::Connected)
            .await;

        let mut shutdown = self.context.shutdown_signal();
        let idle_interval = self.context.config().idle_interval();

        let reason = loop {
            if !self.context.is_running() {
                break TerminationReason::Shutdown;
            }
            if !self.context.registry().is_current(&self.worker_id, self.token) {
                break TerminationReason::Replaced;
            }

            let Some(task) = self.context.claim_next_task(&self.worker_id, self.token) else {
                if let Err(e) = self.stream.write_all(NO_TASK.as_bytes()).await {
                    break TerminationReason::WriteFailed(e.to_string());
                }
                self.update_status(WorkerStatus::Idle).await;

                tokio::select! {
                    _ = sleep(idle_interval) => {}
                    _ = shutdown.wait_for(|stopped| *stopped) => {
                        debug!("Idle wait interrupted by shutdown");
                    }
                }
                continue;
            };

            if let Err(reason) = self.dispatch(&task).await {
                self.transition(SessionState::Failed);
                break reason;
            }
        };

        self.terminate(reason).await
    }

    /// Send one task and handle the worker's reply
    async fn dispatch(&mut self, task: &Task) -> Result<(), TerminationReason> {
        let message = encode_task(task);
        log_task_operation("assign", &self.worker_id, task, "dispatching", None);

        self.transition(SessionState::TaskSent);
        self.update_status(WorkerStatus::processing(&message)).await;
        self.stream
            .write_all(message.as_bytes())
            .await
            .map_err(|e| TerminationReason::WriteFailed(e.to_string()))?;

        self.transition(SessionState::AwaitingResult);
        match self.read_reply().await? {
            WorkerReply::Result(reference) => {
                self.transition(SessionState::Completed);
                let completed = self
                    .context
                    .complete_task(&self.worker_id, self.token, &reference);
                if let Some(result) = completed {
                    log_task_operation("complete", &self.worker_id, task, "completed", Some(&reference));
                    self.context.reporter().result(&result).await;
                }
                self.transition(SessionState::AwaitingTask);
                Ok(())
            }
            WorkerReply::Empty => Err(TerminationReason::EmptyReply),
            WorkerReply::Error => Err(TerminationReason::ErrorReply),
        }
    }

    /// A single read of up to `result_buffer_size` bytes, bounded by the result
    /// timeout when one is configured
    async fn read_reply(&mut self) -> Result<WorkerReply, TerminationReason> {
        let limit = self.context.config().result_timeout();
        let mut buffer = vec![0u8; self.context.config().result_buffer_size];

        let read = self.stream.read(&mut buffer);
        let outcome = match limit {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| TerminationReason::TimedOut)?,
            None => read.await,
        };

        let received = outcome.map_err(|e| TerminationReason::ReadFailed(e.to_string()))?;
        Ok(decode_reply(&buffer[..received]))
    }

    /// Reassign any outstanding task, close the connection and leave the active set
    async fn terminate(mut self, reason: TerminationReason) -> TerminationReason {
        match self.context.reassign_task(&self.worker_id, self.token) {
            Reassignment::Requeued(task) => {
                log_task_operation(
                    "reassign",
                    &self.worker_id,
                    &task,
                    "requeued",
                    Some(&reason.to_string()),
                );
            }
            Reassignment::Abandoned(result) => {
                self.context.reporter().result(&result).await;
            }
            Reassignment::NothingAssigned => {}
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Connection already closed");
        }
        self.transition(SessionState::Terminated);

        if reason.is_failure() {
            warn!(reason = %reason, "Worker session terminated");
        } else {
            info!(reason = %reason, "Worker session closed");
        }

        self.update_status(WorkerStatus::Disconnected).await;
        self.context
            .registry()
            .unregister(&self.worker_id, self.token);
        reason
    }

    async fn update_status(&self, status: WorkerStatus) {
        self.context
            .registry()
            .set_status(&self.worker_id, self.token, status.clone());
        self.context
            .reporter()
            .worker_status(&self.worker_id, &status)
            .await;
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session state transition");
        self.state = next;
    }
}

impl fmt::Debug for DispatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchSession")
            .field("worker_id", &self.worker_id)
            .field("token", &self.token)
            .field("state", &self.state)
            .finish()
    }
}
