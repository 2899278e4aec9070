//! ProxyServer struct and its start/stop lifecycle.
//!
//! A server owns at most one loopback listener at a time. `start` binds it and
//! spawns the accept loop on the calling runtime; `stop` signals the loop and
//! waits for it, so the port is closed once `stop` returns. Dropping the
//! server releases the listener as well.

use super::forwarding::UpstreamClient;
use super::handler::serve_connection;
use super::network::create_loopback_listener;
use crate::config::{ProxyConfig, PLACEHOLDER_API_KEY};
use crate::error::{ProxyError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Where a downstream tool should send its requests instead of the real
/// upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEndpoint {
    pub base_url: String,
    pub api_key: &'static str,
}

/// The main proxy server struct.
pub struct ProxyServer {
    upstream: Arc<UpstreamClient>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    active: Option<ActiveListener>,
    generation: u64,
}

struct ActiveListener {
    port: u16,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl ProxyServer {
    /// Create a stopped server for one upstream.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let upstream = UpstreamClient::new(Arc::new(config))?;
        Ok(Self {
            upstream: Arc::new(upstream),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Shorthand for [`ProxyConfig::new`] followed by [`ProxyServer::new`].
    pub fn for_upstream(upstream_base_url: &str, credential: Option<&str>) -> Result<Self> {
        Self::new(ProxyConfig::new(upstream_base_url, credential)?)
    }

    pub fn config(&self) -> &ProxyConfig {
        self.upstream.config()
    }

    /// Start listening on a fresh loopback port.
    ///
    /// The accept loop is spawned on the Tokio runtime of the caller. Starting
    /// a running server is a no-op, from any thread.
    ///
    /// # Returns
    /// The bound loopback port, or the existing one if already running.
    ///
    /// # Errors
    /// * [`ProxyError::RuntimeUnavailable`] - not running and no Tokio runtime
    ///   is available on this thread
    /// * [`ProxyError::Bind`] - the listening socket could not be created
    pub fn start(&self) -> Result<u16> {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(active) = &lifecycle.active {
            debug!("Proxy already running on port {}", active.port);
            return Ok(active.port);
        }

        let runtime = Handle::try_current().map_err(|_| ProxyError::RuntimeUnavailable)?;
        let listener = create_loopback_listener().map_err(ProxyError::Bind)?;
        let port = listener.local_addr().map_err(ProxyError::Bind)?.port();

        lifecycle.generation += 1;
        info!(
            "Starting SSE normalizing proxy #{} on port {} -> {}",
            lifecycle.generation,
            port,
            self.config().upstream_base_url()
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let accept_task = runtime.spawn(accept_loop(
            listener,
            Arc::clone(&self.upstream),
            shutdown_rx,
            port,
        ));

        lifecycle.active = Some(ActiveListener {
            port,
            shutdown_tx,
            accept_task,
        });
        Ok(port)
    }

    /// Stop accepting connections and close the listener.
    ///
    /// Connections already being served run to completion. Stopping a stopped
    /// server does nothing.
    pub async fn stop(&self) {
        let active = self.lifecycle.lock().active.take();
        let Some(active) = active else {
            return;
        };

        info!("Stopping SSE normalizing proxy on port {}", active.port);
        let _ = active.shutdown_tx.send(());
        if let Err(e) = active.accept_task.await {
            if !e.is_cancelled() {
                error!("Accept loop on port {} failed: {}", active.port, e);
            }
        }
        info!("Proxy on port {} stopped", active.port);
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().active.is_some()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.lifecycle.lock().active.as_ref().map(|a| a.port)
    }

    /// `http://localhost:<port>` while running.
    pub fn local_url(&self) -> Option<String> {
        self.local_port()
            .map(|port| format!("http://localhost:{port}"))
    }

    /// Number of successful starts so far.
    pub fn generation(&self) -> u64 {
        self.lifecycle.lock().generation
    }

    /// Base URL and placeholder key for the downstream tool, while running.
    ///
    /// The placeholder never reaches the upstream; the proxy sends the real
    /// credential itself.
    pub fn client_endpoint(&self) -> Option<ClientEndpoint> {
        self.local_url().map(|base_url| ClientEndpoint {
            base_url,
            api_key: PLACEHOLDER_API_KEY,
        })
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        if let Some(active) = self.lifecycle.get_mut().active.take() {
            debug!("Releasing proxy listener on port {}", active.port);
            let _ = active.shutdown_tx.send(());
            active.accept_task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    upstream: Arc<UpstreamClient>,
    mut shutdown_rx: broadcast::Receiver<()>,
    port: u16,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!("Accept loop on port {} shutting down", port);
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
                        }
                        let upstream = Arc::clone(&upstream);
                        tokio::spawn(async move {
                            debug!("Accepted connection from {}", remote_addr);
                            serve_connection(stream, &upstream).await;
                        });
                    }
                    Err(e) => {
                        error!("Accept error on port {}: {}", port, e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }
}
