//! # Dispatcher Error Types
//!
//! Structured error handling for the dispatcher using thiserror. Worker protocol
//! failures are not errors at this level: the dispatch loop recovers from them by
//! reassigning the task, so only setup, I/O plumbing and collaborator failures
//! surface here.

use thiserror::Error;

use crate::models::TaskParseError;

/// Top-level dispatcher error
#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("Failed to bind to address {address}: {error}")]
    BindFailed { address: String, error: String },

    #[error("Failed to accept worker connection: {0}")]
    AcceptFailed(String),

    #[error("Dispatcher is already running")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Status sink error: {operation}: {message}")]
    Sink { operation: String, message: String },

    #[error("Task source error: {operation}: {message}")]
    Source { operation: String, message: String },

    #[error("Invalid task descriptor: {0}")]
    TaskParse(#[from] TaskParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    pub fn sink(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Sink {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn source(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Source {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatcherError>;
