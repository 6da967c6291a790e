//! The message router (C6, spec §4.4): ferries `message` frames between a
//! client and its bound workstation. Routing is direct — no intermediate
//! queue beyond each session's own outbound mailbox — which is what gives
//! per-pair FIFO ordering (each outbound queue is single-producer from the
//! router's point of view).

use std::time::Duration;

use tunnel_protocol::{DeviceId, Direction, Frame, MessagePayload, TunnelId};

use crate::registry::client::ClientRegistry;
use crate::registry::workstation::WorkstationRegistry;
use crate::session::EnqueueOutcome;

/// What happened to a routed message.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// Enqueued but the peer's queue stayed full past the deadline; the
    /// frame was dropped and the caller should mark its session `slow`.
    TimedOut,
    /// The target is gone (workstation removed, or `device_id` unknown).
    /// Per spec §4.4, an unknown `device_id` is silently dropped — no error
    /// is surfaced to the sender.
    TargetMissing,
}

/// Routes a `client→ws` message from `device_id` to the workstation bound to
/// `tunnel_id`.
pub async fn route_client_to_workstation(
    workstations: &WorkstationRegistry,
    tunnel_id: &TunnelId,
    device_id: &DeviceId,
    data: String,
    deadline: Duration,
) -> RouteOutcome {
    let Some(handle) = workstations.get(tunnel_id) else {
        return RouteOutcome::TargetMissing;
    };
    let frame = Frame::Message {
        payload: MessagePayload {
            device_id: Some(device_id.clone()),
            direction: Direction::ClientToWorkstation,
            data,
        },
    };
    match handle.outbound.enqueue(frame, deadline).await {
        EnqueueOutcome::Sent => RouteOutcome::Delivered,
        EnqueueOutcome::TimedOut => RouteOutcome::TimedOut,
        EnqueueOutcome::Closed => RouteOutcome::TargetMissing,
    }
}

/// Routes a `ws→client` message to the client identified by `device_id`,
/// provided that client is actually bound to the sending workstation's
/// `tunnel_id`. If the client is unknown, or is bound to a different tunnel
/// (spec §3: a `MobileClient` is owned by one session; spec §4.4: a
/// workstation may only reach its own bound clients), the frame is dropped
/// and `dropped_counter` is incremented — no error is returned to the
/// workstation, to avoid coupling a mobile device's lifetime (or a
/// cross-tunnel probing attempt) to the workstation's correctness.
pub async fn route_workstation_to_client(
    clients: &ClientRegistry,
    tunnel_id: &TunnelId,
    device_id: &DeviceId,
    data: String,
    deadline: Duration,
    dropped_counter: &std::sync::atomic::AtomicU64,
) -> RouteOutcome {
    let Some(handle) = clients.get(device_id) else {
        dropped_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return RouteOutcome::TargetMissing;
    };
    if &handle.tunnel_id != tunnel_id {
        dropped_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return RouteOutcome::TargetMissing;
    }
    let frame = Frame::Message {
        payload: MessagePayload {
            device_id: None,
            direction: Direction::WorkstationToClient,
            data,
        },
    };
    match handle.outbound.enqueue(frame, deadline).await {
        EnqueueOutcome::Sent => RouteOutcome::Delivered,
        EnqueueOutcome::TimedOut => RouteOutcome::TimedOut,
        EnqueueOutcome::Closed => {
            dropped_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            RouteOutcome::TargetMissing
        }
    }
}
