//! # Dispatcher Server
//!
//! Connection acceptor and shutdown coordinator. `start` binds the worker listener
//! and spawns the acceptor, the task source poller and (optionally) the status
//! API; `shutdown` stops them and waits for every dispatch loop to finish.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use imgproc_dispatcher::{DispatcherConfig, DispatcherContext, DispatcherServer, StatusReporter};
//!
//! # async fn run() -> imgproc_dispatcher::Result<()> {
//! let context = Arc::new(DispatcherContext::new(DispatcherConfig::default(), StatusReporter::noop()));
//! let server = DispatcherServer::new(context);
//! let address = server.start().await?;
//! println!("listening on {address}");
//! server.wait_for_acceptor_exit().await;
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatch::{DispatchSession, DispatcherContext, TerminationReason};
use crate::error::{DispatcherError, Result};
use crate::source::{TaskSource, TaskSourcePoller};
use crate::web;

type SessionHandles = Arc<Mutex<Vec<JoinHandle<TerminationReason>>>>;

pub struct DispatcherServer {
    context: Arc<DispatcherContext>,
    source: Option<Arc<dyn TaskSource>>,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    status_api_addr: Mutex<Option<SocketAddr>>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    status_api: Mutex<Option<JoinHandle<()>>>,
    sessions: SessionHandles,
    acceptor_done: Arc<watch::Sender<bool>>,
}

impl DispatcherServer {
    pub fn new(context: Arc<DispatcherContext>) -> Self {
        let (acceptor_done, _) = watch::channel(false);
        Self {
            context,
            source: None,
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            status_api_addr: Mutex::new(None),
            acceptor: Mutex::new(None),
            poller: Mutex::new(None),
            status_api: Mutex::new(None),
            sessions: Arc::new(Mutex::new(Vec::new())),
            acceptor_done: Arc::new(acceptor_done),
        }
    }

    /// Poll `source` for task descriptors while running
    pub fn with_source(mut self, source: Arc<dyn TaskSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn context(&self) -> &Arc<DispatcherContext> {
        &self.context
    }

    /// Address the worker listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn status_api_addr(&self) -> Option<SocketAddr> {
        *self.status_api_addr.lock()
    }

    /// Bind the listeners and spawn the background tasks
    #[instrument(skip(self), fields(dispatcher_id = %self.context.id()))]
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DispatcherError::AlreadyRunning);
        }

        let config = self.context.config();
        let listener = bind(&config.bind_address).await?;
        let local_addr = listener.local_addr()?;

        let api_listener = match &config.status_api_bind_address {
            Some(address) => Some(bind(address).await?),
            None => None,
        };

        *self.local_addr.lock() = Some(local_addr);
        info!(address = %local_addr, "Dispatcher listening for workers");

        let acceptor = tokio::spawn(accept_connections(
            listener,
            self.context.clone(),
            self.sessions.clone(),
            self.acceptor_done.clone(),
        ));
        *self.acceptor.lock() = Some(acceptor);

        match &self.source {
            Some(source) => {
                let poller = TaskSourcePoller::new(source.clone(), self.context.clone());
                *self.poller.lock() = Some(tokio::spawn(poller.run()));
            }
            None => debug!("No task source configured, tasks must be enqueued directly"),
        }

        if let Some(api_listener) = api_listener {
            *self.status_api_addr.lock() = api_listener.local_addr().ok();
            let context = self.context.clone();
            *self.status_api.lock() = Some(tokio::spawn(async move {
                if let Err(e) = web::serve(api_listener, context).await {
                    error!(error = %e, "Status API stopped with an error");
                }
            }));
        }

        Ok(local_addr)
    }

    /// Resolves once the acceptor has exited, either on shutdown or after a fatal
    /// accept error
    pub async fn wait_for_acceptor_exit(&self) {
        let mut done = self.acceptor_done.subscribe();
        let _ = done.wait_for(|exited| *exited).await;
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Stop accepting, wait for every dispatch loop to terminate, clear the
    /// status sink and log the final results. Returns `false` when shutdown had
    /// already been performed by an earlier call.
    #[instrument(skip(self), fields(dispatcher_id = %self.context.id()))]
    pub async fn shutdown(&self) -> bool {
        if !self.context.begin_shutdown() {
            debug!("Shutdown already in progress");
            return false;
        }

        let acceptor = self.acceptor.lock().take();
        if let Some(acceptor) = acceptor {
            if let Err(e) = acceptor.await {
                warn!(error = %e, "Connection acceptor ended abnormally");
            }
        }

        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            if let Err(e) = poller.await {
                warn!(error = %e, "Task source poller ended abnormally");
            }
        }

        loop {
            let handles = std::mem::take(&mut *self.sessions.lock());
            if handles.is_empty() {
                break;
            }

            info!(sessions = handles.len(), "Waiting for worker sessions to terminate");
            for outcome in join_all(handles).await {
                match outcome {
                    Ok(reason) => debug!(reason = %reason, "Worker session finished"),
                    Err(e) => warn!(error = %e, "Worker session ended abnormally"),
                }
            }
        }

        let status_api = self.status_api.lock().take();
        if let Some(status_api) = status_api {
            if let Err(e) = status_api.await {
                warn!(error = %e, "Status API ended abnormally");
            }
        }

        self.context.reporter().clear_all().await;

        let results = self.context.results();
        info!(
            results = results.len(),
            pending = self.context.pending().len(),
            "Dispatcher stopped"
        );
        for result in &results {
            info!(worker_id = %result.worker_id, result = %result.sink_text(), "Final result");
        }

        true
    }
}

impl std::fmt::Debug for DispatcherServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherServer")
            .field("dispatcher_id", &self.context.id())
            .field("local_addr", &self.local_addr())
            .field("running", &self.context.is_running())
            .finish()
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|e| DispatcherError::BindFailed {
            address: address.to_string(),
            error: e.to_string(),
        })
}

/// Accept workers until shutdown; an accept error ends the loop
async fn accept_connections(
    listener: TcpListener,
    context: Arc<DispatcherContext>,
    sessions: SessionHandles,
    done: Arc<watch::Sender<bool>>,
) {
    let mut shutdown = context.shutdown_signal();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let worker_id = peer.to_string();
                        info!(worker_id = %worker_id, "Worker connected");

                        let session = DispatchSession::new(worker_id, stream, context.clone());
                        let handle = tokio::spawn(session.run());

                        let mut sessions = sessions.lock();
                        sessions.retain(|handle| !handle.is_finished());
                        sessions.push(handle);
                    }
                    Err(e) => {
                        let e = DispatcherError::AcceptFailed(e.to_string());
                        error!(error = %e, "Connection acceptor stopping");
                        break;
                    }
                }
            }

            _ = shutdown.wait_for(|stopped| *stopped) => {
                info!("Connection acceptor shutting down");
                break;
            }
        }
    }

    drop(listener);
    done.send_replace(true);
}
