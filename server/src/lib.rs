//! # Tunnel Server
//!
//! A WebSocket-based relay server that binds externally reachable mobile
//! clients to workstations sitting behind NAT.
//!
//! ## Architecture
//!
//! ```text
//! Mobile Client ──WS──► Tunnel Server ──WS──► Workstation
//! ```
//!
//! ## Modules
//!
//! - [`config`]    — environment-variable configuration
//! - [`error`]      — session error kinds and their wire surfacing
//! - [`registry`]   — `WorkstationRegistry` / `ClientRegistry` (C3/C4)
//! - [`session`]    — per-connection state machines (C5)
//! - [`handshake`]  — the `Handshaking` state's validation logic
//! - [`router`]     — message forwarding between bound peers (C6)
//! - [`supervisor`] — liveness ping/pong and stale-session eviction (C7)
//! - [`handlers`]   — WebSocket upgrade and dispatch
//! - [`api`]        — health/readiness REST endpoints
//! - [`state`]      — shared application state

pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod session;
pub mod state;
pub mod supervisor;

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use config::Config;
pub use state::AppState;

use registry::ControlSignal;

/// Builds the axum router: the WebSocket upgrade endpoint plus the health
/// surface (spec §6).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(state.config.ws_path.as_str(), get(handlers::ws_handler))
        .route("/healthz", get(api::healthz))
        .route("/readyz", get(api::readyz))
        .route("/health", get(api::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the server to completion: binds the listener, starts the liveness
/// supervisor, serves until a `ctrl_c`/shutdown signal arrives, then
/// broadcasts `close{reason=server_shutdown}` and waits (bounded) for
/// sessions to drain (spec §4.6).
pub async fn run(config: Config) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::new(config.host, config.port);
    let state = AppState::new(config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let supervisor = supervisor::Supervisor::new(
        state.workstations.clone(),
        state.clients.clone(),
        &state.config,
    );
    state.mark_supervisor_running(true);
    let supervisor_state = state.clone();
    let supervisor_task = tokio::spawn(async move {
        supervisor.run(shutdown_rx).await;
        supervisor_state.mark_supervisor_running(false);
    });

    let app = build_router(state.clone());
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "tunnel server listening");
    state.mark_acceptor_running(true);

    let shutdown_deadline = state.config.shutdown_deadline;
    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_state.mark_acceptor_running(false);
            let _ = shutdown_tx.send(true);
            broadcast_shutdown(&shutdown_state, shutdown_deadline).await;
        })
        .await?;

    let _ = supervisor_task.await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Sends `close{reason=server_shutdown}` to every live session (workstation
/// and client) and polls until both registries drain or `deadline` elapses.
async fn broadcast_shutdown(state: &AppState, deadline: Duration) {
    info!("broadcasting server_shutdown to all sessions");
    for (_, handle) in state.workstations.all() {
        let _ = handle
            .control
            .send(ControlSignal::Close(error::SessionError::ServerShutdown))
            .await;
    }
    for (_, handle) in state.clients.all() {
        let _ = handle
            .control
            .send(ControlSignal::Close(error::SessionError::ServerShutdown))
            .await;
    }

    let deadline = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < deadline {
        if state.workstations.is_empty() && state.clients.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
