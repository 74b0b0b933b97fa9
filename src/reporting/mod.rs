//! # Status/Result Reporting
//!
//! Best-effort mirroring of worker status and task results to an external
//! status sink (the dashboard). The dispatcher's in-memory state is authoritative;
//! forwarding failures are logged and never retried or queued, so the sink may
//! diverge from the dispatcher under transient failure.

pub mod http;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{TaskResult, WorkerStatus};

pub use http::HttpStatusSink;
pub use memory::InMemoryStatusSink;

/// External status/result sink
#[async_trait]
pub trait StatusSink: Send + Sync + std::fmt::Debug {
    async fn report_status(&self, worker_id: &str, status: &str) -> Result<()>;

    async fn report_result(&self, result: &str) -> Result<()>;

    async fn clear_all(&self) -> Result<()>;
}

/// Sink used when no dashboard is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatusSink;

#[async_trait]
impl StatusSink for NoopStatusSink {
    async fn report_status(&self, _worker_id: &str, _status: &str) -> Result<()> {
        Ok(())
    }

    async fn report_result(&self, _result: &str) -> Result<()> {
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        Ok(())
    }
}

/// Forwards dispatcher events to a [`StatusSink`], swallowing failures
#[derive(Debug, Clone)]
pub struct StatusReporter {
    sink: Arc<dyn StatusSink>,
}

impl StatusReporter {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self { sink }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopStatusSink))
    }

    /// Returns whether the sink acknowledged the event
    pub async fn worker_status(&self, worker_id: &str, status: &WorkerStatus) -> bool {
        let status_text = status.to_string();
        match self.sink.report_status(worker_id, &status_text).await {
            Ok(()) => {
                debug!(worker_id = %worker_id, status = %status_text, "Status forwarded");
                true
            }
            Err(e) => {
                warn!(worker_id = %worker_id, status = %status_text, error = %e, "Failed to send status update");
                false
            }
        }
    }

    pub async fn result(&self, result: &TaskResult) -> bool {
        let result_text = result.sink_text();
        match self.sink.report_result(&result_text).await {
            Ok(()) => {
                debug!(result = %result_text, "Result forwarded");
                true
            }
            Err(e) => {
                warn!(result = %result_text, error = %e, "Failed to add result");
                false
            }
        }
    }

    pub async fn clear_all(&self) -> bool {
        match self.sink.clear_all().await {
            Ok(()) => {
                info!("Cleared all statuses and results from the status sink");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear statuses and results from the status sink");
                false
            }
        }
    }
}
