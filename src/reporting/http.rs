//! HTTP status sink
//!
//! Talks to the dashboard service:
//!
//! - `POST {base}/status` with `{"worker_id": .., "status": ..}`
//! - `POST {base}/add_result` with `{"result": ..}`
//! - `POST {base}/clear_all`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::json;
use tracing::debug;

use super::StatusSink;
use crate::error::{DispatcherError, Result};

#[derive(Debug, Clone)]
pub struct HttpStatusSink {
    client: Client,
    base_url: String,
}

impl HttpStatusSink {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatcherError::Configuration(format!("HTTP client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(operation: &str, response: Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatcherError::sink(
            operation,
            format!("HTTP {}: {}", status.as_u16(), body),
        ))
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn report_status(&self, worker_id: &str, status: &str) -> Result<()> {
        debug!(worker_id = %worker_id, status = %status, "POST /status");

        let response = self
            .client
            .post(self.endpoint("status"))
            .json(&json!({ "worker_id": worker_id, "status": status }))
            .send()
            .await
            .map_err(|e| DispatcherError::sink("report_status", e))?;

        Self::check("report_status", response).await
    }

    async fn report_result(&self, result: &str) -> Result<()> {
        debug!(result = %result, "POST /add_result");

        let response = self
            .client
            .post(self.endpoint("add_result"))
            .json(&json!({ "result": result }))
            .send()
            .await
            .map_err(|e| DispatcherError::sink("report_result", e))?;

        Self::check("report_result", response).await
    }

    async fn clear_all(&self) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("clear_all"))
            .send()
            .await
            .map_err(|e| DispatcherError::sink("clear_all", e))?;

        Self::check("clear_all", response).await
    }
}
