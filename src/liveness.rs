//! Liveness endpoint.
//!
//! The hosting platform only considers the process alive while something
//! answers HTTP on the configured port, so this serves a single static route
//! next to the Telegram dispatcher. It never takes the bot down: bind or
//! serve failures are logged and the task simply ends.

use std::io;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::LivenessConfig;

pub const LIVENESS_BODY: &str = "Telegram Gemini bot is running";

/// What to do when the configured port is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPolicy {
    /// Fail; the platform expects exactly this port.
    Strict,
    /// Bind an OS-assigned port instead. For local re-runs.
    FallbackToEphemeral,
}

impl PortPolicy {
    pub fn from_flag(fallback: bool) -> Self {
        if fallback {
            PortPolicy::FallbackToEphemeral
        } else {
            PortPolicy::Strict
        }
    }
}

async fn home() -> &'static str {
    LIVENESS_BODY
}

pub fn router() -> Router {
    Router::new().route("/", get(home))
}

/// Bind `0.0.0.0:port`, applying `policy` if the port is in use.
pub async fn bind(port: u16, policy: PortPolicy) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(e)
            if e.kind() == io::ErrorKind::AddrInUse
                && policy == PortPolicy::FallbackToEphemeral =>
        {
            warn!("Port {} is already in use, falling back to an ephemeral port", port);
            let fallback = SocketAddr::from(([0, 0, 0, 0], 0));
            TcpListener::bind(fallback)
                .await
                .context("Failed to bind an ephemeral port")
        }
        Err(e) => Err(e).with_context(|| format!("Failed to bind to {addr}")),
    }
}

async fn serve(listener: TcpListener, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Liveness endpoint listening on http://{}", addr);

    axum::serve(listener, router())
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .context("Liveness server error")
}

/// Background liveness server, stopped with [`LivenessServer::shutdown`].
pub struct LivenessServer {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LivenessServer {
    /// Start serving in a background task. Returns immediately; a failure to
    /// bind is only logged.
    pub fn spawn(config: &LivenessConfig) -> Self {
        let port = config.port;
        let policy = PortPolicy::from_flag(config.port_fallback);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let result = match bind(port, policy).await {
                Ok(listener) => serve(listener, shutdown_rx).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Liveness endpoint unavailable: {:#}", e);
            }
        });

        Self { shutdown_tx, task }
    }

    /// Signal graceful shutdown and wait for the task to finish.
    pub async fn shutdown(self) {
        // The receiver is gone if the server already stopped on its own.
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Liveness task ended abnormally: {}", e);
        }
        info!("Liveness endpoint stopped");
    }
}
