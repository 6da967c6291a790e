//! Workstation session driver: owns one accepted stream from handshake
//! through drain (spec §4.3). The handshake and routing decisions live in
//! [`crate::handshake`] and [`crate::router`] so they can be unit-tested
//! without a socket; this module is the thin orchestration that pumps
//! frames across the wire.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};
use tunnel_protocol::{Direction, Frame, WorkstationRegisterPayload, WorkstationRegisteredPayload};

use crate::handshake;
use crate::registry::ControlSignal;
use crate::router::{self, RouteOutcome};
use crate::session::{EnqueueOutcome, Inbound, SlownessTracker};
use crate::state::AppState;

pub async fn run(socket: WebSocket, state: AppState, payload: WorkstationRegisterPayload) {
    let (mut sink, mut stream) = socket.split();
    let now = Instant::now();

    let (tunnel_id, handle, mut outbound_rx, mut control_rx) =
        match handshake::register_workstation(&state.workstations, &state.config, payload, now).await
        {
            Ok(tuple) => tuple,
            Err(err) => {
                warn!(error = %err, "workstation registration failed");
                let _ = sink
                    .send(Message::Text(
                        Frame::error(err.wire_code(), err.to_string()).encode_text().into(),
                    ))
                    .await;
                return;
            }
        };

    info!(%tunnel_id, name = %handle.display_name, "workstation registered");
    if sink
        .send(Message::Text(
            Frame::WorkstationRegistered {
                payload: WorkstationRegisteredPayload {
                    tunnel_id: tunnel_id.clone(),
                },
            }
            .encode_text()
            .into(),
        ))
        .await
        .is_err()
    {
        state.workstations.remove(&tunnel_id);
        return;
    }

    let mut slow = SlownessTracker::default();
    let mut close_reason = "closed";

    'live: loop {
        tokio::select! {
            biased;

            signal = control_rx.recv() => {
                match signal {
                    Some(ControlSignal::Close(err)) => {
                        close_reason = err.close_reason();
                        break 'live;
                    }
                    None => {}
                }
            }
            ws_msg = stream.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(text.as_bytes()) {
                            Ok(frame) => {
                                match handle_inbound(&state, &tunnel_id, frame, &mut slow).await {
                                    Inbound::Continue => {}
                                    Inbound::Reply(reply) => {
                                        if sink.send(Message::Text(reply.encode_text().into())).await.is_err() {
                                            close_reason = "stream_error";
                                            break 'live;
                                        }
                                    }
                                    Inbound::Drain(reason) => {
                                        close_reason = reason;
                                        break 'live;
                                    }
                                    Inbound::ProtocolViolation(message) => {
                                        let _ = sink
                                            .send(Message::Text(
                                                Frame::error("protocol", message).encode_text().into(),
                                            ))
                                            .await;
                                        close_reason = "protocol";
                                        break 'live;
                                    }
                                }
                            }
                            Err(_) => {
                                let _ = sink
                                    .send(Message::Text(
                                        Frame::error("protocol", "decode failure").encode_text().into(),
                                    ))
                                    .await;
                                close_reason = "error";
                                break 'live;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        close_reason = "closed";
                        break 'live;
                    }
                    Some(Err(_)) => {
                        close_reason = "stream_error";
                        break 'live;
                    }
                    _ => {}
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(f) => {
                        if sink.send(Message::Text(f.encode_text().into())).await.is_err() {
                            close_reason = "stream_error";
                            break 'live;
                        }
                    }
                    None => break 'live,
                }
            }
        }
    }

    drain(&state, &tunnel_id, &mut sink, &mut outbound_rx, close_reason).await;
}

async fn handle_inbound(
    state: &AppState,
    tunnel_id: &tunnel_protocol::TunnelId,
    frame: Frame,
    slow: &mut SlownessTracker,
) -> Inbound {
    match frame {
        Frame::Ping => Inbound::Reply(Frame::Pong),
        Frame::Pong => {
            if let Some(handle) = state.workstations.get(tunnel_id) {
                handle.last_seen.touch(Instant::now());
            }
            Inbound::Continue
        }
        Frame::Message { payload } => {
            if payload.direction != Direction::WorkstationToClient {
                return Inbound::ProtocolViolation(
                    "message frame from a workstation must carry direction ws→client".into(),
                );
            }
            let Some(device_id) = payload.device_id else {
                return Inbound::ProtocolViolation(
                    "message frame from a workstation must include device_id".into(),
                );
            };
            let outcome = router::route_workstation_to_client(
                &state.clients,
                tunnel_id,
                &device_id,
                payload.data,
                state.config.outbound_enqueue_deadline,
                state.dropped_messages_ref(),
            )
            .await;
            if matches!(outcome, RouteOutcome::TimedOut) && slow.record(&EnqueueOutcome::TimedOut) {
                return Inbound::Drain("slow_peer");
            }
            if matches!(outcome, RouteOutcome::Delivered) {
                slow.record(&EnqueueOutcome::Sent);
            }
            Inbound::Continue
        }
        Frame::Close { .. } => Inbound::Drain("close"),
        other => Inbound::ProtocolViolation(format!(
            "unexpected frame type from a workstation session: {other:?}"
        )),
    }
}

async fn drain(
    state: &AppState,
    tunnel_id: &tunnel_protocol::TunnelId,
    sink: &mut (impl futures::Sink<Message> + Unpin),
    outbound_rx: &mut tokio::sync::mpsc::Receiver<Frame>,
    reason: &'static str,
) {
    let deadline = tokio::time::Instant::now() + state.config.drain_deadline;
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, outbound_rx.recv()).await {
        let _ = sink.send(Message::Text(frame.encode_text().into())).await;
    }
    let _ = sink
        .send(Message::Text(Frame::close(reason).encode_text().into()))
        .await;

    state.workstations.remove(tunnel_id);

    // Cascade close: every client bound to this tunnel is now orphaned.
    for (_, client_handle) in state.clients.by_tunnel(tunnel_id) {
        let _ = client_handle
            .control
            .send(ControlSignal::Close(crate::error::SessionError::PeerGone))
            .await;
    }

    info!(%tunnel_id, %reason, "workstation session closed");
}
