//! The `Handshaking` state (spec §4.3): validates the first frame of each
//! connection class and either seats the session in the right registry or
//! returns the `SessionError` to surface to the peer. No I/O — callers own
//! the stream.

use std::time::Instant;

use tokio::sync::mpsc;
use tunnel_protocol::{AuthKey, ConnectPayload, DeviceId, Frame, TunnelId, WorkstationRegisterPayload};
use uuid::Uuid;

use crate::config::Config;
use crate::error::SessionError;
use crate::registry::client::{ClientHandle, ClientRegistry, InsertResult};
use crate::registry::workstation::{WorkstationHandle, WorkstationRegistry};
use crate::registry::{ControlReceiver, InsertOutcome};

/// Bounded retries on a generated `TunnelId` colliding with an existing one
/// before giving up with `error.internal` (spec §4.3).
const MAX_TUNNEL_ID_RETRIES: u8 = 8;

pub type WorkstationRegistered = (
    TunnelId,
    WorkstationHandle,
    mpsc::Receiver<Frame>,
    ControlReceiver,
);

/// Validates `registration_api_key`, mints a fresh `TunnelId`, and inserts
/// the workstation into the registry.
pub async fn register_workstation(
    registry: &WorkstationRegistry,
    config: &Config,
    payload: WorkstationRegisterPayload,
    now: Instant,
) -> Result<WorkstationRegistered, SessionError> {
    let presented = payload.api_key;
    if !config.registration_api_key.secure_eq(&presented) {
        return Err(SessionError::Unauthorized(
            "registration key mismatch".into(),
        ));
    }
    let tunnel_auth_key = payload.auth_key;

    for _ in 0..MAX_TUNNEL_ID_RETRIES {
        let candidate = TunnelId::new(generate_tunnel_id())
            .expect("generated tunnel ids are always valid");
        match registry.insert(
            candidate.clone(),
            tunnel_auth_key.clone(),
            payload.name.clone(),
            config.outbound_queue_capacity,
            now,
        ) {
            Ok((handle, outbound_rx, control_rx)) => {
                return Ok((candidate, handle, outbound_rx, control_rx));
            }
            Err(InsertOutcome::Conflict) => continue,
        }
    }
    Err(SessionError::Internal(
        "exhausted tunnel id retries".into(),
    ))
}

fn generate_tunnel_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub type ClientConnected = (
    DeviceId,
    TunnelId,
    ClientHandle,
    mpsc::Receiver<Frame>,
    ControlReceiver,
    InsertResult,
);

/// Validates `tunnel_id`/`auth_key` against the bound workstation and
/// inserts the client, evicting any prior session for the same `device_id`.
pub async fn connect_client(
    workstations: &WorkstationRegistry,
    clients: &ClientRegistry,
    config: &Config,
    payload: ConnectPayload,
    now: Instant,
) -> Result<ClientConnected, SessionError> {
    let tunnel_id = payload.tunnel_id;
    let device_id = payload.device_id;
    let presented = payload.auth_key;

    if workstations.validate(&tunnel_id, &presented).is_none() {
        return Err(SessionError::Unauthorized(
            "unknown tunnel or tunnel auth key mismatch".into(),
        ));
    }

    let (handle, outbound_rx, control_rx, insert_result) = clients.insert(
        device_id.clone(),
        tunnel_id.clone(),
        config.outbound_queue_capacity,
        now,
    );
    Ok((
        device_id,
        tunnel_id,
        handle,
        outbound_rx,
        control_rx,
        insert_result,
    ))
}
