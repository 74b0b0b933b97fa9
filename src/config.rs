//! # Configuration
//!
//! Layered configuration for the dispatcher and worker binaries. Values are
//! resolved from built-in defaults, then an optional TOML file, then environment
//! variables (`DISPATCHER__POLL_INTERVAL_MS=2000`, `IMGPROC_WORKER__MASTER_ADDRESS=...`).
//! Command-line overrides are applied by the binaries on top of the loaded value.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::{MASTER_RECEIVE_BUFFER, WORKER_RECEIVE_BUFFER};
use crate::error::{DispatcherError, Result};

pub const DISPATCHER_CONFIG_FILE: &str = "config/dispatcher.toml";
pub const DISPATCHER_ENV_PREFIX: &str = "DISPATCHER";
pub const WORKER_CONFIG_FILE: &str = "config/worker.toml";
pub const WORKER_ENV_PREFIX: &str = "IMGPROC_WORKER";

/// External queue backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// In-process queue; only usable when embedding the dispatcher
    Memory,
    /// Redis list (requires the `redis` feature)
    Redis,
}

/// Durable external queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Connection URL for the backend (e.g. "redis://127.0.0.1:6379")
    pub url: Option<String>,
    /// Queue (list) name the front end publishes task descriptors to
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            url: Some("redis://127.0.0.1:6379".to_string()),
            name: "taskqueue".to_string(),
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Deployment environment (development, test, production)
    pub environment: String,

    /// TCP address workers connect to
    pub bind_address: String,

    /// Interval between external queue polls in milliseconds
    pub poll_interval_ms: u64,

    /// Maximum descriptors drained per poll
    pub poll_batch_size: usize,

    /// Wait between `NO_TASK` signals to an idle worker in milliseconds
    pub idle_interval_ms: u64,

    /// Receive buffer for a single worker reply
    pub result_buffer_size: usize,

    /// Result read timeout; unset means a read may block indefinitely
    pub result_timeout_ms: Option<u64>,

    /// Failures after which a task is recorded as failed instead of re-queued (0 = never)
    pub max_delivery_attempts: u32,

    /// Base URL of the status/result sink; unset disables forwarding
    pub status_sink_url: Option<String>,

    /// Request timeout for sink calls in milliseconds
    pub sink_timeout_ms: u64,

    /// Bind address of the read-only status API; unset disables it
    pub status_api_bind_address: Option<String>,

    pub queue: QueueConfig,

    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            bind_address: "0.0.0.0:5000".to_string(),
            poll_interval_ms: 10_000,
            poll_batch_size: 32,
            idle_interval_ms: 5_000,
            result_buffer_size: MASTER_RECEIVE_BUFFER,
            result_timeout_ms: None,
            max_delivery_attempts: 0,
            status_sink_url: None,
            sink_timeout_ms: 5_000,
            status_api_bind_address: None,
            queue: QueueConfig::default(),
            log_json: false,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from `path` (or the default file if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = load_layered(path, DISPATCHER_CONFIG_FILE, DISPATCHER_ENV_PREFIX)?;
        config.validate()?;

        debug!(
            bind_address = %config.bind_address,
            poll_interval_ms = config.poll_interval_ms,
            idle_interval_ms = config.idle_interval_ms,
            "Dispatcher configuration loaded"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        parse_socket_addr("bind_address", &self.bind_address)?;

        if let Some(address) = &self.status_api_bind_address {
            parse_socket_addr("status_api_bind_address", address)?;
        }

        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than zero"));
        }
        if self.poll_batch_size == 0 {
            return Err(invalid("poll_batch_size", "must be greater than zero"));
        }
        if self.idle_interval_ms == 0 {
            return Err(invalid("idle_interval_ms", "must be greater than zero"));
        }
        if self.result_buffer_size == 0 {
            return Err(invalid("result_buffer_size", "must be greater than zero"));
        }
        if self.result_timeout_ms == Some(0) {
            return Err(invalid("result_timeout_ms", "must be greater than zero when set"));
        }
        if self.sink_timeout_ms == 0 {
            return Err(invalid("sink_timeout_ms", "must be greater than zero"));
        }
        if self.queue.backend == QueueBackend::Redis && self.queue.url.is_none() {
            return Err(invalid("queue.url", "required for the redis backend"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn result_timeout(&self) -> Option<Duration> {
        self.result_timeout_ms.map(Duration::from_millis)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }
}

/// Worker client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub environment: String,

    /// Dispatcher address to connect to
    pub master_address: String,

    /// Delay between connection attempts in milliseconds
    pub reconnect_delay_ms: u64,

    /// Pause after a `NO_TASK` signal before reading again, in milliseconds
    pub idle_delay_ms: u64,

    /// Receive buffer for task messages
    pub task_buffer_size: usize,

    /// Program and leading arguments invoked as `<command...> <operation> <file> [<second file>]`
    pub processing_command: Vec<String>,

    pub log_json: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            master_address: "127.0.0.1:5000".to_string(),
            reconnect_delay_ms: 5_000,
            idle_delay_ms: 5_000,
            task_buffer_size: WORKER_RECEIVE_BUFFER,
            processing_command: vec!["python3".to_string(), "img_processing.py".to_string()],
            log_json: false,
        }
    }
}

impl WorkerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = load_layered(path, WORKER_CONFIG_FILE, WORKER_ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.master_address.trim().is_empty() {
            return Err(invalid("master_address", "must not be empty"));
        }
        if self.processing_command.is_empty() {
            return Err(invalid("processing_command", "must name a program"));
        }
        if self.task_buffer_size == 0 {
            return Err(invalid("task_buffer_size", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

fn load_layered<T: DeserializeOwned>(
    path: Option<&Path>,
    default_file: &str,
    env_prefix: &str,
) -> Result<T> {
    let file_source = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(default_file).required(false),
    };

    Config::builder()
        .add_source(file_source)
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|config| config.try_deserialize::<T>())
        .map_err(|e| DispatcherError::Configuration(e.to_string()))
}

fn parse_socket_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| invalid(field, format!("'{value}' is not a socket address: {e}")))
}

fn invalid(field: &str, reason: impl std::fmt::Display) -> DispatcherError {
    DispatcherError::Configuration(format!("{field}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.idle_interval(), Duration::from_secs(5));
        assert_eq!(config.poll_batch_size, 32);
        assert_eq!(config.result_buffer_size, 4096);
        assert!(config.result_timeout().is_none());

        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dispatcher.toml");
        fs::write(
            &path,
            r#"
bind_address = "127.0.0.1:6000"
idle_interval_ms = 250
result_timeout_ms = 30000
status_sink_url = "http://localhost:5001"

[queue]
name = "images"
"#,
        )
        .unwrap();

        let config = DispatcherConfig::load(Some(&path)).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:6000");
        assert_eq!(config.idle_interval(), Duration::from_millis(250));
        assert_eq!(config.result_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.status_sink_url.as_deref(), Some("http://localhost:5001"));
        assert_eq!(config.queue.name, "images");
        assert_eq!(config.queue.backend, QueueBackend::Redis);
        assert_eq!(config.queue.url.as_deref(), Some("redis://127.0.0.1:6379"));
        // Unspecified keys keep their defaults
        assert_eq!(config.poll_batch_size, 32);
    }

    #[test]
    fn test_example_files_load() {
        let dispatcher = DispatcherConfig::load(Some(Path::new("config/dispatcher.example.toml")))
            .unwrap();
        assert_eq!(dispatcher, DispatcherConfig::default());

        let worker = WorkerConfig::load(Some(Path::new("config/worker.example.toml"))).unwrap();
        assert_eq!(worker, WorkerConfig::default());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(DispatcherConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = DispatcherConfig {
            bind_address: "not-an-address".to_string(),
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DispatcherConfig {
            idle_interval_ms: 0,
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DispatcherConfig {
            result_timeout_ms: Some(0),
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DispatcherConfig {
            queue: QueueConfig {
                backend: QueueBackend::Redis,
                url: None,
                name: "taskqueue".to_string(),
            },
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            processing_command: vec![],
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
