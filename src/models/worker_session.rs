//! # Worker Session Model
//!
//! Dispatcher-side record of one connected worker.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use super::task::Task;

/// Lifecycle status of a worker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Connected,
    Idle,
    /// Carries the wire message of the task being processed
    Processing { task_message: String },
    Disconnected,
}

impl WorkerStatus {
    pub fn processing(task_message: impl Into<String>) -> Self {
        WorkerStatus::Processing {
            task_message: task_message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Disconnected)
    }
}

/// Status text as forwarded to the status sink
impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Connected => f.write_str("connected"),
            WorkerStatus::Idle => f.write_str("idle"),
            WorkerStatus::Processing { task_message } => {
                write!(f, "processing task {task_message}")
            }
            WorkerStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

impl Serialize for WorkerStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One active worker connection
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSession {
    /// Peer address as `host:port`
    pub id: String,
    /// Identifies this connection among any that reuse the same peer address
    pub token: Uuid,
    pub status: WorkerStatus,
    pub assigned_task: Option<Task>,
    pub connected_at: DateTime<Utc>,
}

impl WorkerSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: Uuid::new_v4(),
            status: WorkerStatus::Connected,
            assigned_task: None,
            connected_at: Utc::now(),
        }
    }
}

/// Key used by the status report: the host part of a `host:port` session id.
///
/// Workers sharing a host are merged in the report while remaining distinct
/// sessions in the registry.
pub fn display_key(worker_id: &str) -> &str {
    worker_id
        .rsplit_once(':')
        .map(|(host, _port)| host)
        .unwrap_or(worker_id)
}
