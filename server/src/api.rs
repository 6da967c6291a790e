//! REST endpoints (spec §6): plain liveness/readiness probes plus a JSON
//! health body carrying connection counts and the dropped-message counter
//! (spec §9 open question (a): exposed rather than surfaced as an error).

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::state::AppState;

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

#[derive(Serialize)]
pub struct Connections {
    pub workstations: usize,
    pub clients: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime: u64,
    pub connections: Connections,
    pub dropped_messages: u64,
    pub timestamp: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.uptime_secs(),
        connections: Connections {
            workstations: state.workstations.len(),
            clients: state.clients.len(),
        },
        dropped_messages: state.dropped_messages(),
        timestamp,
    })
}
