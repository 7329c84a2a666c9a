use std::net::SocketAddr;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::handlers;
use crate::relay::Relay;
use crate::websocket::websocket_handler;

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub metrics: PrometheusHandle,
}

/// Owns the listening socket, the relay state and the monitor task.
///
/// `start` resolves once the listener is bound (a bind failure is the only
/// fatal error); `stop` runs the full shutdown sequence and is safe to call
/// when already stopped.
pub struct Server {
    config: Config,
    relay: Relay,
    running: Option<Running>,
}

struct Running {
    port: u16,
    shutdown_tx: oneshot::Sender<()>,
    serve_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let relay = Relay::new(&config);
        Self {
            config,
            relay,
            running: None,
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.port)
    }

    pub fn client_count(&self) -> usize {
        self.relay.registry().len()
    }

    /// Bind and start serving. Returns the bound port (useful with port 0).
    /// Calling `start` on a running server is a no-op reporting the
    /// existing port.
    pub async fn start(&mut self, port: u16) -> Result<u16> {
        if let Some(running) = &self.running {
            info!(port = running.port, "server already running");
            return Ok(running.port);
        }

        let state = AppState {
            relay: self.relay.clone(),
            metrics: metrics_handle(),
        };
        let app = Router::new()
            .route("/", get(handlers::root_forbidden))
            .route("/health", get(handlers::health_check))
            .route("/metrics", get(handlers::metrics_handler))
            .route("/ws", get(websocket_handler))
            .fallback(handlers::not_found)
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let bound = listener
            .local_addr()
            .context("listener has no local address")?
            .port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_task = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                warn!(error = %err, "server exited with error");
            }
        });
        let monitor_task = self.relay.spawn_monitor();

        info!(
            port = bound,
            max_clients = self.config.max_clients,
            "peerhub listening"
        );
        self.running = Some(Running {
            port: bound,
            shutdown_tx,
            serve_task,
            monitor_task,
        });
        Ok(bound)
    }

    /// Shutdown sequence: stop the monitor, notify and close every peer,
    /// then release the listener. Runs to completion even when individual
    /// sends fail; a second call is a no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!(port = running.port, "stopping peerhub");

        running.monitor_task.abort();
        self.relay.shutdown();
        let _ = running.shutdown_tx.send(());
        if let Err(err) = running.serve_task.await {
            if !err.is_cancelled() {
                warn!(error = %err, "serve task ended abnormally");
            }
        }
        info!("peerhub stopped");
    }
}

/// Install the process-wide Prometheus recorder once; later servers in the
/// same process reuse the handle.
fn metrics_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}
