//! # WebSocket Handlers
//!
//! The single entry point for every inbound stream: upgrades the HTTP
//! connection, reads the first frame within `REGISTRATION_TIMEOUT_MS`, and
//! dispatches to the workstation or client session driver based on which
//! handshake frame arrived (spec §4.3 — `Handshaking` state).

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::warn;
use tunnel_protocol::Frame;

use crate::session;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(mut socket: WebSocket, state: AppState) {
    let first = tokio::time::timeout(state.config.registration_timeout, socket.next()).await;

    match first {
        Ok(Some(Ok(Message::Text(text)))) => match Frame::decode(text.as_bytes()) {
            Ok(Frame::WorkstationRegister { payload }) => {
                session::workstation::run(socket, state, payload).await;
            }
            Ok(Frame::Connect { payload }) => {
                session::client::run(socket, state, payload).await;
            }
            Ok(_) => {
                reject(socket, "protocol", "first frame must be workstation.register or connect")
                    .await;
            }
            Err(e) => {
                reject(socket, "protocol", &format!("malformed handshake frame: {e}")).await;
            }
        },
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
            // Peer hung up before completing the handshake; nothing to clean up.
        }
        Ok(Some(Ok(_))) => {
            reject(socket, "protocol", "handshake frame must be text").await;
        }
        Ok(Some(Err(e))) => {
            warn!(error = %e, "websocket error during handshake");
        }
        Err(_) => {
            reject(socket, "timeout", "no handshake frame within the registration timeout").await;
        }
    }
}

async fn reject(mut socket: WebSocket, code: &str, message: &str) {
    let _ = socket
        .send(Message::Text(Frame::error(code, message).encode_text().into()))
        .await;
}
