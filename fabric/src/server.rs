//! Process wiring: router assembly and the graceful-shutdown lifecycle
//! (`spec.md` §5), grounded in the teacher's `runtime::lifecycle::Application`
//! and `server::routes::build_router`.
//!
//! Unlike the teacher's single `AppState`, the gateway, chat hub, and RTMP
//! webhook each own disjoint state (a connection registry, a room registry,
//! a `Store`) with no shared fields worth merging into one struct — so each
//! sub-router is built against its own state and merged with axum's
//! state-erasing `Router::with_state`, rather than forcing one `AppState`
//! that would just wrap three unrelated `Arc`s.

use crate::chat::{ChatState, upgrade as chat_upgrade};
use crate::gateway::{ConnectionManager, GatewayState, upgrade as gateway_upgrade};
use crate::rtmp::{RtmpWebhookState, callback as rtmp_callback};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Dependency the readiness probe checks (`spec.md` §6's liveness/readiness
/// split: `/health` never touches the database, `/health/ready` does).
#[derive(Clone)]
struct ReadinessState {
    pool: PgPool,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
}

async fn readiness_check(State(state): State<ReadinessState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(ReadinessResponse { ready: database, database }))
}

/// Assemble the full router: `/ws` (notification gateway), `/ws/live/:stream_id`
/// (livestream chat), `/rtmp/callback` (media server webhook), `/health` and
/// `/health/ready`.
#[must_use]
pub fn build_router(
    gateway_state: GatewayState,
    chat_state: ChatState,
    rtmp_state: RtmpWebhookState,
    pool: PgPool,
) -> Router {
    let gateway_router = Router::new().route("/ws", get(gateway_upgrade)).with_state(gateway_state);
    let chat_router = Router::new().route("/ws/live/:stream_id", get(chat_upgrade)).with_state(chat_state);
    let rtmp_router = Router::new().route("/rtmp/callback", post(rtmp_callback)).with_state(rtmp_state);
    let health_router = Router::new()
        .route("/health", get(composable_rust_web::handlers::health_check))
        .route("/health/ready", get(readiness_check))
        .with_state(ReadinessState { pool });

    Router::new()
        .merge(gateway_router)
        .merge(chat_router)
        .merge(rtmp_router)
        .merge(health_router)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// A background task this process must fold into the graceful shutdown
/// sequence: it is handed a `shutdown` receiver and runs until told to stop.
pub struct BackgroundTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Wrap an already-spawned task's handle under `name`, used only for
    /// shutdown logging.
    #[must_use]
    pub const fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }
}

/// Running application: HTTP listener, router, and the set of background
/// tasks that share its shutdown broadcast, mirroring the teacher's
/// `Application` (listener + app + consumers + shutdown_tx).
pub struct Application {
    listener: tokio::net::TcpListener,
    app: Router,
    background: Vec<BackgroundTask>,
    shutdown_tx: broadcast::Sender<()>,
    connections: Arc<ConnectionManager>,
    gateway_state: GatewayState,
    shutdown_budget: Duration,
}

impl Application {
    /// Wire a running application from its listener, router, and background
    /// tasks, all of which already hold a `shutdown` receiver cloned from
    /// `shutdown_tx` before being spawned.
    #[must_use]
    pub fn new(
        listener: tokio::net::TcpListener,
        app: Router,
        background: Vec<BackgroundTask>,
        shutdown_tx: broadcast::Sender<()>,
        connections: Arc<ConnectionManager>,
        gateway_state: GatewayState,
        shutdown_budget: Duration,
    ) -> Self {
        Self {
            listener,
            app,
            background,
            shutdown_tx,
            connections,
            gateway_state,
            shutdown_budget,
        }
    }

    /// Run until a shutdown signal arrives, then drain every connection and
    /// background task before returning (`spec.md` §5's graceful shutdown
    /// sequence).
    pub async fn run(self) {
        info!("HTTP server listening for requests");
        if let Err(error) = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            warn!(%error, "HTTP server exited with an error");
        }

        info!("HTTP server stopped, draining connections and background tasks");
        self.gateway_state.stop_accepting();
        let _ = self.shutdown_tx.send(());

        Self::drain_connections(&self.connections, self.shutdown_budget).await;
        Self::await_background(self.background, self.shutdown_budget).await;

        info!("graceful shutdown complete");
    }

    /// Cancel every live gateway connection's context and wait (bounded by
    /// `budget`) for both of its pump tasks to exit.
    async fn drain_connections(connections: &ConnectionManager, budget: Duration) {
        let targets = connections.all_connections().await;
        info!(count = targets.len(), "draining gateway connections");
        let drains = targets
            .into_iter()
            .map(|(user_id, id)| connections.remove_and_wait(&user_id, id));
        if tokio::time::timeout(budget, futures::future::join_all(drains)).await.is_err() {
            warn!("connection drain exceeded shutdown budget, forcing close");
        }
    }

    async fn await_background(background: Vec<BackgroundTask>, budget: Duration) {
        for task in background {
            match tokio::time::timeout(budget, task.handle).await {
                Ok(Ok(())) => info!(task = task.name, "background task stopped gracefully"),
                Ok(Err(error)) => warn!(task = task.name, %error, "background task panicked"),
                Err(_) => warn!(task = task.name, "background task shutdown timed out"),
            }
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C signal"),
        () = terminate => info!("received SIGTERM signal"),
    }
}
