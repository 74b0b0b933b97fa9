//! # Data Model
//!
//! Tasks, worker sessions and results owned by a dispatcher instance.

pub mod task;
pub mod task_result;
pub mod worker_session;

pub use task::{Operation, Task, TaskDescriptor, TaskParseError};
pub use task_result::{ResultOutcome, TaskResult, ERROR_MARKER};
pub use worker_session::{display_key, WorkerSession, WorkerStatus};
