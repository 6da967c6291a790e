//! Wire protocol for the tunnel fabric.
//!
//! This crate has no async runtime dependency on purpose: it is the part of
//! the fabric a future client implementation could share with the server.

mod frame;
mod ids;

pub use frame::{
    ClosePayload, ConnectPayload, Direction, ErrorPayload, Frame, MessagePayload,
    WorkstationRegisterPayload, WorkstationRegisteredPayload, DEFAULT_MAX_FRAME_BYTES,
};
pub use ids::{AuthKey, DeviceId, TunnelId, MAX_TUNNEL_ID_LEN, MIN_AUTH_KEY_LEN};

use thiserror::Error;

/// Everything that can go wrong turning bytes into a [`Frame`] or a raw
/// string into one of the validated identifier types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{0} is invalid: {1}")]
    InvalidIdentifier(&'static str, &'static str),
    #[error("frame payload is not valid UTF-8")]
    NonUtf8Payload,
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("malformed frame: {0}")]
    Malformed(String),
}
