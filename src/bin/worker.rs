//! # Image Processing Worker
//!
//! Connects to the dispatcher and runs the processing command for each task it
//! receives.
//!
//! ```bash
//! cargo run --bin imgproc-worker -- --master 10.0.0.5:5000
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use imgproc_dispatcher::logging::init_structured_logging;
use imgproc_dispatcher::server::shutdown_signal;
use imgproc_dispatcher::{WorkerClient, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "imgproc-worker")]
#[command(about = "Process image tasks handed out by the dispatcher")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: config/worker.toml, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dispatcher address (host:port)
    #[arg(short, long)]
    master: Option<String>,

    /// Processing command and leading arguments, e.g. `--command python3 img_processing.py`
    #[arg(long, num_args = 1..)]
    command: Option<Vec<String>>,

    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        WorkerConfig::load(cli.config.as_deref()).context("Failed to load worker configuration")?;
    if let Some(master) = cli.master {
        config.master_address = master;
    }
    if let Some(command) = cli.command {
        config.processing_command = command;
    }
    config.log_json |= cli.json_logs;
    config.validate().context("Invalid worker configuration")?;

    init_structured_logging(&config.environment, config.log_json);
    info!(
        master_address = %config.master_address,
        command = ?config.processing_command,
        "Starting image processing worker"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = WorkerClient::with_command_executor(config);
    let handle = tokio::spawn(async move { worker.run(stop_rx).await });

    shutdown_signal().await;
    stop_tx.send_replace(true);

    handle
        .await
        .context("Worker task panicked")?
        .context("Worker stopped with an error")?;
    info!("Worker shutdown complete");
    Ok(())
}
