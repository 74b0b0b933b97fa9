//! # Structured Logging Module
//!
//! Environment-aware structured logging for the dispatcher and worker binaries.
//! `RUST_LOG` takes precedence; otherwise the level follows the deployment
//! environment, taken from `DISPATCHER_ENV`/`APP_ENV` or else the configured one.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::models::Task;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging for the `configured` environment, optionally
/// emitting JSON lines
pub fn init_structured_logging(configured: &str, json: bool) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment(configured);
        let log_level = get_log_level(&environment);
        let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(filter())
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter())
                .boxed()
        };

        // A global subscriber may already be installed (e.g. by a test harness)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json,
            "Structured logging initialized"
        );
    });
}

/// Get current environment, preferring environment variables over `configured`
pub fn get_environment(configured: &str) -> String {
    std::env::var("DISPATCHER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| configured.to_string())
}

/// Get log level based on environment
pub fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a task lifecycle event for a worker session
pub fn log_task_operation(
    operation: &str,
    worker_id: &str,
    task: &Task,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        worker_id = %worker_id,
        sequence = task.sequence(),
        file_name = %task.file_name(),
        task_operation = %task.operation(),
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "TASK_OPERATION"
    );
}
