//! ---
//! bc_section: "04-networking-external-interfaces"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "API server lifecycle and router assembly."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use buscast_core::PositionService;
use buscast_metrics::SharedRegistry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{rest, websocket};

const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state injected into the axum handlers.
pub struct ApiState {
    /// Snapshot store, broadcast hub, and stop list.
    pub service: PositionService,
    /// Registry rendered at `/metrics`; `None` answers 503.
    pub metrics: Option<SharedRegistry>,
    /// Messages queued per WebSocket client before its sends start failing.
    pub subscriber_buffer: usize,
    /// How long a broadcast waits on a full client queue.
    pub send_timeout: Duration,
}

/// Builder used to configure and spawn the API server.
#[derive(Clone)]
pub struct ApiServerBuilder {
    listen: SocketAddr,
    service: PositionService,
    metrics: Option<SharedRegistry>,
    subscriber_buffer: usize,
    send_timeout: Duration,
}

impl ApiServerBuilder {
    /// Construct a builder serving `service` on `listen`.
    pub fn new(listen: SocketAddr, service: PositionService) -> Self {
        Self {
            listen,
            service,
            metrics: None,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Attach a Prometheus registry exposed at `/metrics`.
    pub fn with_metrics_registry(mut self, registry: SharedRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Bound the per-client outbound queue.
    pub fn with_subscriber_limits(mut self, buffer: usize, send_timeout: Duration) -> Self {
        self.subscriber_buffer = buffer.max(1);
        self.send_timeout = send_timeout;
        self
    }

    /// Router with every endpoint, usable without binding a socket.
    pub fn router(self) -> Router {
        let state = Arc::new(ApiState {
            service: self.service,
            metrics: self.metrics,
            subscriber_buffer: self.subscriber_buffer,
            send_timeout: self.send_timeout,
        });
        Router::new()
            .route("/", get(rest::get_root))
            .route("/api/buses", get(rest::get_buses))
            .route("/api/stops", get(rest::get_stops))
            .route("/metrics", get(rest::get_metrics))
            .route("/ws/buses", get(websocket::upgrade_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener and serve until the returned handle is shut down.
    pub async fn spawn(self) -> anyhow::Result<ApiServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "api server listening");

        let router = self.router();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "api server exited with error");
            }
        });

        Ok(ApiServerHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle returned from [`ApiServerBuilder::spawn`].
#[derive(Debug)]
pub struct ApiServerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ApiServerHandle {
    /// Socket address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}
