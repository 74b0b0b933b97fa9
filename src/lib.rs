#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Image Processing Dispatcher
//!
//! Master dispatcher that distributes image-processing tasks across a pool of
//! remote workers connected over plain TCP.
//!
//! ## Overview
//!
//! Task descriptors arrive on a durable external queue. A poller moves them into
//! an in-memory pending queue, and one dispatch loop per connected worker hands
//! tasks out, collects result references and forwards status and results to a
//! dashboard. When a worker fails or disconnects mid-task, its task goes back to
//! the front of the pending queue.
//!
//! ## Module Organization
//!
//! - [`dispatch`] - Pending queue, session registry, wire protocol and dispatch loop
//! - [`server`] - Connection acceptor and shutdown coordinator
//! - [`source`] - External queue adapters and the task source poller
//! - [`reporting`] - Status/result forwarding to the dashboard
//! - [`worker`] - Worker-side client
//! - [`web`] - Read-only status API
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use imgproc_dispatcher::{
//!     DispatcherConfig, DispatcherContext, DispatcherServer, InMemoryTaskSource, StatusReporter,
//! };
//!
//! # async fn example() -> imgproc_dispatcher::Result<()> {
//! let config = DispatcherConfig::load(None)?;
//! let context = Arc::new(DispatcherContext::new(config, StatusReporter::noop()));
//!
//! let source = Arc::new(InMemoryTaskSource::new());
//! source.push("cat.jpg,canny_edge_detector,https://blob/cat.jpg");
//!
//! let server = DispatcherServer::new(context).with_source(source);
//! server.start().await?;
//! server.wait_for_acceptor_exit().await;
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod reporting;
pub mod server;
pub mod source;
pub mod test_utils;
pub mod web;
pub mod worker;

pub use config::{DispatcherConfig, QueueBackend, QueueConfig, WorkerConfig};
pub use dispatch::{DispatcherContext, PendingQueue, Reassignment, WorkerRegistry};
pub use error::{DispatcherError, Result};
pub use models::{Operation, Task, TaskDescriptor, TaskResult, WorkerStatus};
pub use reporting::{HttpStatusSink, InMemoryStatusSink, NoopStatusSink, StatusReporter, StatusSink};
pub use server::DispatcherServer;
pub use source::{InMemoryTaskSource, TaskSource, TaskSourcePoller};
pub use worker::{CommandExecutor, TaskExecutor, WorkerClient};
