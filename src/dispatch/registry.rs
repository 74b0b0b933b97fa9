//! # Worker Session Registry
//!
//! Tracks active worker sessions and their assignments, and keeps the
//! append-only status history that outlives individual sessions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{display_key, Task, WorkerSession, WorkerStatus};

/// One entry of the status history
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Status history grouped by display key (host without port)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatusReport {
    pub id: String,
    pub statuses: Vec<String>,
}

/// Registry of active sessions, keyed by `host:port`
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    sessions: DashMap<String, WorkerSession>,
    history: Mutex<Vec<StatusEntry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection with status `connected`. Returns the
    /// session token and any task still held by a displaced session that had the
    /// same `host:port`.
    pub fn register(&self, worker_id: &str) -> (Uuid, Option<Task>) {
        let session = WorkerSession::new(worker_id);
        let token = session.token;
        let displaced = self
            .sessions
            .insert(worker_id.to_string(), session)
            .and_then(|previous| {
                warn!(
                    worker_id = %worker_id,
                    previous_token = %previous.token,
                    "Worker session already registered, replacing it"
                );
                previous.assigned_task
            });
        self.append_history(worker_id, WorkerStatus::Connected);
        info!(worker_id = %worker_id, token = %token, "Worker session registered");
        (token, displaced)
    }

    /// Remove the session from the active set if it is still the one holding
    /// `worker_id`, recording its terminal status
    pub fn unregister(&self, worker_id: &str, token: Uuid) -> Option<WorkerSession> {
        let removed = self
            .sessions
            .remove_if(worker_id, |_, session| session.token == token)
            .map(|(_, session)| session);
        match &removed {
            Some(session) => {
                if session.assigned_task.is_some() {
                    warn!(worker_id = %worker_id, "Unregistered worker session still held a task");
                }
                if !session.status.is_terminal() {
                    self.append_history(worker_id, WorkerStatus::Disconnected);
                }
                info!(worker_id = %worker_id, "Worker session unregistered");
            }
            None => debug!(worker_id = %worker_id, token = %token, "Unregister of replaced or unknown worker session"),
        }
        removed
    }

    /// Whether `token` is the session currently registered under `worker_id`
    pub fn is_current(&self, worker_id: &str, token: Uuid) -> bool {
        self.sessions
            .get(worker_id)
            .is_some_and(|session| session.token == token)
    }

    /// Update a session's status. Repeated idle cycles leave a single `idle`
    /// entry; every other status is recorded each time it is set. A replaced
    /// session's status still reaches the history.
    pub fn set_status(&self, worker_id: &str, token: Uuid, status: WorkerStatus) {
        let record = match self.sessions.get_mut(worker_id) {
            Some(mut session) if session.token == token => {
                let repeated_idle =
                    status == WorkerStatus::Idle && session.status == WorkerStatus::Idle;
                session.status = status.clone();
                !repeated_idle
            }
            _ => {
                debug!(worker_id = %worker_id, status = %status, "Status for replaced or unknown worker session");
                true
            }
        };

        if record {
            self.append_history(worker_id, status);
        }
    }

    /// Record `task` as the session's assignment. Returns `false`, leaving the
    /// task unowned by any session, when `token` is not the registered session.
    pub fn assign(&self, worker_id: &str, token: Uuid, task: &Task) -> bool {
        match self.sessions.get_mut(worker_id) {
            Some(mut session) if session.token == token => {
                if let Some(previous) = session.assigned_task.replace(task.clone()) {
                    warn!(
                        worker_id = %worker_id,
                        previous = %previous,
                        "Worker session already held an assignment"
                    );
                }
                true
            }
            _ => {
                debug!(worker_id = %worker_id, task = %task, "Assignment to replaced or unknown worker session");
                false
            }
        }
    }

    /// Clear and return the session's assignment
    pub fn take_assignment(&self, worker_id: &str, token: Uuid) -> Option<Task> {
        self.sessions
            .get_mut(worker_id)
            .filter(|session| session.token == token)
            .and_then(|mut session| session.assigned_task.take())
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerSession> {
        self.sessions.get(worker_id).map(|s| s.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_sessions(&self) -> Vec<WorkerSession> {
        let mut sessions: Vec<WorkerSession> =
            self.sessions.iter().map(|s| s.value().clone()).collect();
        sessions.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        sessions
    }

    pub fn status_history(&self) -> Vec<StatusEntry> {
        self.history.lock().clone()
    }

    /// Status history grouped by host, in order of first appearance
    pub fn status_report(&self) -> Vec<WorkerStatusReport> {
        let history = self.history.lock();
        let mut report: Vec<WorkerStatusReport> = Vec::new();

        for entry in history.iter() {
            let key = display_key(&entry.worker_id);
            let status = entry.status.to_string();
            match report.iter_mut().find(|r| r.id == key) {
                Some(existing) => existing.statuses.push(status),
                None => report.push(WorkerStatusReport {
                    id: key.to_string(),
                    statuses: vec![status],
                }),
            }
        }

        report
    }

    fn append_history(&self, worker_id: &str, status: WorkerStatus) {
        self.history.lock().push(StatusEntry {
            worker_id: worker_id.to_string(),
            status,
            recorded_at: Utc::now(),
        });
    }
}
