//! # Test Utilities
//!
//! Helpers for spinning up a dispatcher on an ephemeral port with short intervals,
//! shared by unit and integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::DispatcherConfig;
use crate::dispatch::DispatcherContext;
use crate::error::Result;
use crate::reporting::{InMemoryStatusSink, StatusReporter};
use crate::server::DispatcherServer;
use crate::source::TaskSource;

/// Configuration bound to `127.0.0.1:0` with millisecond-scale intervals
pub fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        environment: "test".to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        poll_interval_ms: 20,
        idle_interval_ms: 50,
        ..DispatcherConfig::default()
    }
}

/// A started dispatcher and the in-memory sink it reports to
#[derive(Debug)]
pub struct TestDispatcher {
    pub server: DispatcherServer,
    pub sink: Arc<InMemoryStatusSink>,
    pub address: SocketAddr,
}

impl TestDispatcher {
    pub fn context(&self) -> &Arc<DispatcherContext> {
        self.server.context()
    }
}

/// Start a dispatcher with an in-memory sink and an optional task source
pub async fn start_dispatcher(
    config: DispatcherConfig,
    source: Option<Arc<dyn TaskSource>>,
) -> Result<TestDispatcher> {
    let sink = Arc::new(InMemoryStatusSink::new());
    let context = Arc::new(DispatcherContext::new(config, StatusReporter::new(sink.clone())));

    let mut server = DispatcherServer::new(context);
    if let Some(source) = source {
        server = server.with_source(source);
    }
    let address = server.start().await?;

    Ok(TestDispatcher {
        server,
        sink,
        address,
    })
}
