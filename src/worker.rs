//! # Worker Client
//!
//! The worker side of the protocol. A worker keeps one connection to the
//! dispatcher, reads one message per read, runs the processing command for each
//! task and answers with the command's output (or `ERROR`). Lost connections are
//! retried after a fixed delay.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::WorkerConfig;
use crate::dispatch::{decode_master_message, Assignment, MasterMessage, ERROR_REPLY};
use crate::error::Result;

/// Runs a single assignment and produces the reply sent back to the dispatcher
#[async_trait]
pub trait TaskExecutor: Send + Sync + std::fmt::Debug {
    async fn execute(&self, assignment: &Assignment) -> String;
}

/// Executes `<command...> <operation> <fileName> [<secondaryReference>]`
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, assignment: &Assignment) -> String {
        let Some((program, leading_args)) = self.command.split_first() else {
            warn!("No processing command configured");
            return ERROR_REPLY.to_string();
        };

        let output = Command::new(program)
            .args(leading_args)
            .args(assignment.command_args())
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if stdout.is_empty() {
                    warn!(file_name = %assignment.file_name, "Processing command produced no output");
                    ERROR_REPLY.to_string()
                } else {
                    stdout
                }
            }
            Ok(output) => {
                warn!(
                    file_name = %assignment.file_name,
                    operation = %assignment.operation,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Processing command failed"
                );
                ERROR_REPLY.to_string()
            }
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to run processing command");
                ERROR_REPLY.to_string()
            }
        }
    }
}

#[derive(Debug)]
pub struct WorkerClient {
    config: WorkerConfig,
    executor: Arc<dyn TaskExecutor>,
}

impl WorkerClient {
    pub fn new(config: WorkerConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { config, executor }
    }

    /// Worker using the configured processing command
    pub fn with_command_executor(config: WorkerConfig) -> Self {
        let executor = Arc::new(CommandExecutor::new(config.processing_command.clone()));
        Self::new(config, executor)
    }

    /// Serve the dispatcher, reconnecting as needed, until `shutdown` turns true
    #[instrument(skip_all, fields(master_address = %self.config.master_address))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let stream = tokio::select! {
                stream = self.connect() => stream,
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            };

            match self.serve(stream, &mut shutdown).await {
                Ok(()) => info!("Connection to dispatcher closed"),
                Err(e) => warn!(error = %e, "Connection to dispatcher lost"),
            }

            tokio::select! {
                _ = sleep(self.config.reconnect_delay()) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Connect to the dispatcher, retrying every `reconnect_delay`
    async fn connect(&self) -> TcpStream {
        loop {
            match TcpStream::connect(&self.config.master_address).await {
                Ok(stream) => {
                    info!("Connected to dispatcher");
                    return stream;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in = ?self.config.reconnect_delay(),
                        "Dispatcher unreachable"
                    );
                    sleep(self.config.reconnect_delay()).await;
                }
            }
        }
    }

    /// Handle messages on one connection until it closes or shutdown is requested
    async fn serve(&self, mut stream: TcpStream, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let mut buffer = vec![0u8; self.config.task_buffer_size];

        loop {
            let received = tokio::select! {
                read = stream.read(&mut buffer) => read?,
                _ = shutdown.wait_for(|stopped| *stopped) => return Ok(()),
            };
            if received == 0 {
                return Ok(());
            }

            let reply = match decode_master_message(&buffer[..received]) {
                Ok(MasterMessage::NoTask) => {
                    debug!("No task available");
                    sleep(self.config.idle_delay()).await;
                    continue;
                }
                Ok(MasterMessage::Task(assignment)) => {
                    info!(
                        file_name = %assignment.file_name,
                        operation = %assignment.operation,
                        "Processing task"
                    );
                    self.executor.execute(&assignment).await
                }
                Err(e) => {
                    warn!(error = %e, "Unreadable task message");
                    ERROR_REPLY.to_string()
                }
            };

            stream.write_all(reply.as_bytes()).await?;
        }
    }
}
