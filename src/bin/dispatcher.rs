//! # Image Processing Dispatcher
//!
//! Runs the master dispatcher: listens for workers, polls the task queue and
//! forwards status to the dashboard until SIGINT/SIGTERM.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults, config/dispatcher.toml if present, DISPATCHER__* overrides
//! cargo run --bin imgproc-dispatcher
//!
//! # Explicit file and dashboard
//! cargo run --bin imgproc-dispatcher -- --config dispatcher.toml --status-sink-url http://localhost:5001
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use imgproc_dispatcher::logging::init_structured_logging;
use imgproc_dispatcher::server::shutdown_signal;
use imgproc_dispatcher::source;
use imgproc_dispatcher::{
    DispatcherConfig, DispatcherContext, DispatcherServer, HttpStatusSink, StatusReporter,
};

#[derive(Parser, Debug)]
#[command(name = "imgproc-dispatcher")]
#[command(about = "Distribute image-processing tasks to connected workers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: config/dispatcher.toml, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address workers connect to
    #[arg(short, long)]
    bind: Option<String>,

    /// Dashboard base URL for status and result forwarding
    #[arg(long)]
    status_sink_url: Option<String>,

    /// Address for the read-only status API
    #[arg(long)]
    status_api: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DispatcherConfig::load(cli.config.as_deref())
        .context("Failed to load dispatcher configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(url) = cli.status_sink_url {
        config.status_sink_url = Some(url);
    }
    if let Some(address) = cli.status_api {
        config.status_api_bind_address = Some(address);
    }
    config.log_json |= cli.json_logs;
    config.validate().context("Invalid dispatcher configuration")?;

    init_structured_logging(&config.environment, config.log_json);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Starting image processing dispatcher"
    );

    let reporter = match &config.status_sink_url {
        Some(url) => {
            info!(url = %url, "Forwarding status to dashboard");
            StatusReporter::new(Arc::new(HttpStatusSink::new(url.clone(), config.sink_timeout())?))
        }
        None => {
            warn!("No status sink configured, status forwarding disabled");
            StatusReporter::noop()
        }
    };

    let task_source =
        source::from_config(&config.queue).context("Failed to set up the task queue")?;
    let context = Arc::new(DispatcherContext::new(config, reporter));
    let server = DispatcherServer::new(context).with_source(task_source);

    let address = server.start().await.context("Failed to start dispatcher")?;
    info!(address = %address, "Dispatcher running, press Ctrl+C to shut down");

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        _ = server.wait_for_acceptor_exit() => warn!("Connection acceptor exited"),
    }

    server.shutdown().await;
    info!("Dispatcher shutdown complete");
    Ok(())
}
