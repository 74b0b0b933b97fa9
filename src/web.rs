//! # Status API
//!
//! Read-only HTTP view of the dispatcher's in-memory state:
//!
//! - `GET /status`: status history grouped by host
//! - `GET /results`: recorded results
//! - `GET /pending`: pending queue depth and active sessions

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::dispatch::{DispatcherContext, WorkerStatusReport};
use crate::models::{TaskResult, WorkerSession};

/// Body of `GET /pending`
#[derive(Debug, Clone, Serialize)]
pub struct PendingOverview {
    pub pending_tasks: usize,
    pub active_sessions: Vec<WorkerSession>,
}

pub fn router(context: Arc<DispatcherContext>) -> Router {
    Router::new()
        .route("/status", get(list_statuses))
        .route("/results", get(list_results))
        .route("/pending", get(pending_overview))
        .with_state(context)
}

/// Serve the status API until the dispatcher shuts down
pub async fn serve(listener: TcpListener, context: Arc<DispatcherContext>) -> std::io::Result<()> {
    let mut shutdown = context.shutdown_signal();
    if let Ok(address) = listener.local_addr() {
        info!(address = %address, "Status API listening");
    }

    axum::serve(listener, router(context))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await
}

/// GET /status
pub async fn list_statuses(
    State(context): State<Arc<DispatcherContext>>,
) -> Json<Vec<WorkerStatusReport>> {
    debug!("Serving worker statuses");
    Json(context.registry().status_report())
}

/// GET /results
pub async fn list_results(State(context): State<Arc<DispatcherContext>>) -> Json<Vec<TaskResult>> {
    debug!("Serving results");
    Json(context.results())
}

/// GET /pending
pub async fn pending_overview(
    State(context): State<Arc<DispatcherContext>>,
) -> Json<PendingOverview> {
    Json(PendingOverview {
        pending_tasks: context.pending().len(),
        active_sessions: context.registry().active_sessions(),
    })
}
