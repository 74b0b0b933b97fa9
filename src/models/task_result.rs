//! # Task Result Model

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::task::{Operation, Task};

/// Marker recorded for tasks abandoned after exhausting their delivery attempts
pub const ERROR_MARKER: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResultOutcome {
    Completed { result_reference: String },
    Failed { marker: String },
}

/// Entry of the append-only results list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub file_name: String,
    pub operation: Operation,
    #[serde(flatten)]
    pub outcome: ResultOutcome,
    pub worker_id: String,
    pub recorded_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn completed(task: &Task, worker_id: &str, result_reference: impl Into<String>) -> Self {
        Self::new(
            task,
            worker_id,
            ResultOutcome::Completed {
                result_reference: result_reference.into(),
            },
        )
    }

    pub fn failed(task: &Task, worker_id: &str) -> Self {
        Self::new(
            task,
            worker_id,
            ResultOutcome::Failed {
                marker: ERROR_MARKER.to_string(),
            },
        )
    }

    fn new(task: &Task, worker_id: &str, outcome: ResultOutcome) -> Self {
        Self {
            file_name: task.file_name().to_string(),
            operation: task.operation(),
            outcome,
            worker_id: worker_id.to_string(),
            recorded_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, ResultOutcome::Completed { .. })
    }

    pub fn result_reference(&self) -> Option<&str> {
        match &self.outcome {
            ResultOutcome::Completed { result_reference } => Some(result_reference),
            ResultOutcome::Failed { .. } => None,
        }
    }

    /// `fileName,operation,reference` as expected by the status sink
    pub fn sink_text(&self) -> String {
        let reference = match &self.outcome {
            ResultOutcome::Completed { result_reference } => result_reference.as_str(),
            ResultOutcome::Failed { marker } => marker.as_str(),
        };
        format!("{},{},{}", self.file_name, self.operation, reference)
    }
}
