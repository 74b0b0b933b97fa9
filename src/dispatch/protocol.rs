//! # Worker Wire Protocol
//!
//! Plain text over a persistent TCP connection, one exchange at a time:
//!
//! - master → worker: `NO_TASK`, or `fileName,operation[,secondaryReference]`
//! - worker → master: an opaque result reference, or `ERROR`
//!
//! There is no framing beyond a single read or write per exchange. The master reads
//! replies into a 4096-byte buffer and workers read tasks into a 1024-byte buffer;
//! longer messages are truncated by the reader.

use crate::models::{Operation, Task, TaskParseError};

pub const NO_TASK: &str = "NO_TASK";
pub const ERROR_REPLY: &str = "ERROR";

pub const MASTER_RECEIVE_BUFFER: usize = 4096;
pub const WORKER_RECEIVE_BUFFER: usize = 1024;

/// Serialize a task for the worker. The primary reference is not sent; workers
/// resolve the file by name.
pub fn encode_task(task: &Task) -> String {
    match task.secondary_reference() {
        Some(secondary) => format!("{},{},{}", task.file_name(), task.operation(), secondary),
        None => format!("{},{}", task.file_name(), task.operation()),
    }
}

/// A worker's reply to an assigned task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    /// Opaque result reference
    Result(String),
    /// The worker reported the task failed
    Error,
    /// Nothing was received; treated as an explicit failure
    Empty,
}

pub fn decode_reply(bytes: &[u8]) -> WorkerReply {
    let text = String::from_utf8_lossy(bytes);
    match text.trim() {
        "" => WorkerReply::Empty,
        ERROR_REPLY => WorkerReply::Error,
        reference => WorkerReply::Result(reference.to_string()),
    }
}

/// A task as seen by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub file_name: String,
    pub operation: Operation,
    pub secondary_reference: Option<String>,
}

impl Assignment {
    /// Arguments for the processing command: `operation fileName [secondaryReference]`
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![self.operation.to_string(), self.file_name.clone()];
        if let Some(secondary) = &self.secondary_reference {
            args.push(secondary.clone());
        }
        args
    }
}

/// A message received by a worker from the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterMessage {
    NoTask,
    Task(Assignment),
}

/// Decode a master message. Idle signals that arrive back to back in one read
/// (`NO_TASKNO_TASK...`) collapse into a single `NoTask`. Only whole `NO_TASK`
/// tokens are skipped, so a file name starting with `NO_TASK` is kept intact.
pub fn decode_master_message(bytes: &[u8]) -> Result<MasterMessage, TaskParseError> {
    let text = String::from_utf8_lossy(bytes);
    let mut remaining = text.trim();
    while let Some(rest) = remaining.strip_prefix(NO_TASK) {
        let rest = rest.trim_start();
        if !(rest.is_empty() || rest.starts_with(NO_TASK)) {
            break;
        }
        remaining = rest;
    }

    if remaining.is_empty() {
        return Ok(MasterMessage::NoTask);
    }

    let fields: Vec<&str> = remaining.split(',').map(str::trim).collect();
    if !(2..=3).contains(&fields.len()) {
        return Err(TaskParseError::FieldCount {
            expected: "2 or 3",
            found: fields.len(),
        });
    }
    if fields[0].is_empty() {
        return Err(TaskParseError::EmptyFileName);
    }

    let operation: Operation = fields[1].parse()?;
    let secondary_reference = fields.get(2).map(|s| s.to_string());
    match (operation.requires_secondary_reference(), &secondary_reference) {
        (true, None) => return Err(TaskParseError::MissingSecondaryReference),
        (false, Some(_)) => return Err(TaskParseError::UnexpectedSecondaryReference(operation)),
        _ => {}
    }

    Ok(MasterMessage::Task(Assignment {
        file_name: fields[0].to_string(),
        operation,
        secondary_reference,
    }))
}
