use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use scribe_engine::Orchestrator;
use scribe_telemetry::MetricsRecorder;

use crate::config::ServerSettings;
use crate::connection::{self, Dispatcher};
use crate::manager::{self, ConnectionManager};
use crate::worker::Worker;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Option<Arc<MetricsRecorder>>,
    pub stream_deltas: bool,
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind, start serving, and return a handle. The server stops when `shutdown` is cancelled.
pub async fn start(
    settings: &ServerSettings,
    orchestrator: Arc<Orchestrator>,
    metrics: Option<Arc<MetricsRecorder>>,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let manager = Arc::new(
        ConnectionManager::new(settings.max_send_queue).with_metrics(metrics.clone()),
    );

    let cleanup = manager::start_cleanup_task(
        Arc::clone(&manager),
        Duration::from_secs(settings.cleanup_interval_secs),
        shutdown.clone(),
    );

    let state = AppState {
        manager: Arc::clone(&manager),
        orchestrator,
        metrics,
        stream_deltas: settings.stream_deltas,
        shutdown: shutdown.clone(),
    };

    let router = build_router(state);
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, "scribe server started");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        manager,
        shutdown,
        server,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`, keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub manager: Arc<ConnectionManager>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Cancel every connection and wait for the listener to close.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
        info!("scribe server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Wire a new socket to its own worker and reader/writer tasks.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let registration = state.manager.register(&state.shutdown);
    let connection_id = registration.id.clone();
    info!(connection_id = %connection_id, "websocket client connected");

    let (job_tx, job_rx) = mpsc::unbounded_channel();
    let worker = Worker {
        connection_id: connection_id.clone(),
        manager: Arc::clone(&state.manager),
        orchestrator: Arc::clone(&state.orchestrator),
        stream_deltas: state.stream_deltas,
    };
    tokio::spawn(worker.run(job_rx));

    let dispatcher = Dispatcher {
        connection_id: connection_id.clone(),
        manager: Arc::clone(&state.manager),
        jobs: job_tx,
        metrics: state.metrics.clone(),
    };
    connection::handle_ws_connection(socket, registration, Arc::clone(&state.manager), dispatcher)
        .await;

    info!(connection_id = %connection_id, "websocket client disconnected");
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let provider = state.orchestrator.provider();
    let metrics = state
        .metrics
        .as_ref()
        .map(|m| serde_json::to_value(m.snapshot()).unwrap_or_default());

    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.manager.count(),
        "sessions": state.manager.session_count(),
        "provider": provider.name(),
        "model": provider.model(),
        "metrics": metrics,
    }))
}
