//! Mobile client session driver — the counterpart to
//! [`crate::session::workstation`]. A client's drain never cascades (spec
//! §3: "Removal does not affect the workstation").

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};
use tunnel_protocol::{ConnectPayload, Direction, Frame};

use crate::handshake;
use crate::registry::ControlSignal;
use crate::router::{self, RouteOutcome};
use crate::session::{EnqueueOutcome, Inbound, SlownessTracker};
use crate::state::AppState;

pub async fn run(socket: WebSocket, state: AppState, payload: ConnectPayload) {
    let (mut sink, mut stream) = socket.split();
    let now = Instant::now();

    let (device_id, tunnel_id, _handle, mut outbound_rx, mut control_rx, insert_result) =
        match handshake::connect_client(
            &state.workstations,
            &state.clients,
            &state.config,
            payload,
            now,
        )
        .await
        {
            Ok(tuple) => tuple,
            Err(err) => {
                warn!(error = %err, "client connect failed");
                let _ = sink
                    .send(Message::Text(
                        Frame::error(err.wire_code(), err.to_string()).encode_text().into(),
                    ))
                    .await;
                return;
            }
        };

    // Scenario 5 (spec §8): a prior session with the same device_id was
    // just evicted from the registry by the insert above; tell it to close.
    if let Some(old) = insert_result.replaced {
        let _ = old
            .control
            .send(ControlSignal::Close(crate::error::SessionError::Replaced))
            .await;
    }

    info!(%device_id, %tunnel_id, "client connected");
    if sink
        .send(Message::Text(Frame::Connected.encode_text().into()))
        .await
        .is_err()
    {
        state.clients.remove(&device_id);
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
                                match handle_inbound(&state, &device_id, &tunnel_id, frame, &mut slow).await {
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

    drain(&state, &device_id, &mut sink, &mut outbound_rx, close_reason).await;
}

async fn handle_inbound(
    state: &AppState,
    device_id: &tunnel_protocol::DeviceId,
    tunnel_id: &tunnel_protocol::TunnelId,
    frame: Frame,
    slow: &mut SlownessTracker,
) -> Inbound {
    match frame {
        Frame::Ping => Inbound::Reply(Frame::Pong),
        Frame::Pong => {
            if let Some(handle) = state.clients.get(device_id) {
                handle.last_seen.touch(Instant::now());
            }
            Inbound::Continue
        }
        Frame::Message { payload } => {
            if payload.direction != Direction::ClientToWorkstation {
                return Inbound::ProtocolViolation(
                    "message frame from a client must carry direction client→ws".into(),
                );
            }
            let outcome = router::route_client_to_workstation(
                &state.workstations,
                tunnel_id,
                device_id,
                payload.data,
                state.config.outbound_enqueue_deadline,
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
            "unexpected frame type from a client session: {other:?}"
        )),
    }
}

async fn drain(
    state: &AppState,
    device_id: &tunnel_protocol::DeviceId,
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
    state.clients.remove(device_id);
    info!(%device_id, %reason, "client session closed");
}
