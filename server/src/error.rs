//! Session-local error kinds (spec §7). Every kind maps to a single
//! `error.*` or `close` frame sent to the peer that hit it and, except for
//! `internal`, never propagates further than that session.

use thiserror::Error;
use tunnel_protocol::ProtocolError;

#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("handshake or pong timeout")]
    Timeout,
    #[error("session missed its liveness deadline")]
    Stale,
    #[error("outbound queue stayed full past two consecutive deadlines")]
    SlowPeer,
    #[error("bound workstation was removed")]
    PeerGone,
    #[error("replaced by a newer session with the same device_id")]
    Replaced,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("server is shutting down")]
    ServerShutdown,
}

impl SessionError {
    /// The wire `error.code` this kind surfaces as, when it surfaces as an
    /// `error` frame at all (`stale` and `peer_gone` surface as `close`
    /// instead — see `close_reason`).
    pub fn wire_code(&self) -> &'static str {
        match self {
            SessionError::Protocol(_) => "protocol",
            SessionError::Unauthorized(_) => "unauthorized",
            SessionError::Timeout => "timeout",
            SessionError::Stale => "stale",
            SessionError::SlowPeer => "slow_peer",
            SessionError::PeerGone => "peer_gone",
            SessionError::Replaced => "replaced",
            SessionError::Internal(_) => "internal",
            SessionError::ServerShutdown => "server_shutdown",
        }
    }

    /// `close{reason}` used for kinds that are sent as a close rather than
    /// an error frame.
    pub fn close_reason(&self) -> &'static str {
        match self {
            SessionError::Stale => "stale",
            SessionError::PeerGone => "peer_gone",
            SessionError::Replaced => "replaced",
            SessionError::ServerShutdown => "server_shutdown",
            _ => "error",
        }
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        SessionError::Protocol(err.to_string())
    }
}
