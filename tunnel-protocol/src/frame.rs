//! The wire envelope: a small tagged record carrying one control type plus
//! an optional payload. One record per stream frame/datagram-equivalent —
//! this module doesn't care whether the transport is packet-framed or
//! text-line-framed.

use serde::{Deserialize, Serialize};

use crate::{AuthKey, DeviceId, ProtocolError, TunnelId};

/// Default cap on an encoded frame's size. A decode beyond this is rejected
/// before `serde_json` ever touches it.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Which side produced a `message` frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "client→ws")]
    ClientToWorkstation,
    #[serde(rename = "ws→client")]
    WorkstationToClient,
}

/// Every frame the fabric exchanges, tagged by `type` with a `payload`
/// object carrying the type-specific fields. Field names match the wire
/// protocol verbatim (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "workstation.register")]
    WorkstationRegister {
        payload: WorkstationRegisterPayload,
    },
    #[serde(rename = "workstation.registered")]
    WorkstationRegistered {
        payload: WorkstationRegisteredPayload,
    },
    #[serde(rename = "connect")]
    Connect { payload: ConnectPayload },
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "message")]
    Message { payload: MessagePayload },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "close")]
    Close { payload: ClosePayload },
    #[serde(rename = "error")]
    Error { payload: ErrorPayload },
}

// Identifier and secret fields use the validated newtypes from `ids`, not
// plain `String`, so a malformed or over-length identifier is rejected by
// `Frame::decode` itself rather than surfacing one layer up.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkstationRegisterPayload {
    pub api_key: AuthKey,
    pub name: String,
    pub auth_key: AuthKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkstationRegisteredPayload {
    pub tunnel_id: TunnelId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub tunnel_id: TunnelId,
    pub auth_key: AuthKey,
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub device_id: Option<DeviceId>,
    pub direction: Direction,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl Frame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Frame::Error {
            payload: ErrorPayload {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn close(reason: impl Into<String>) -> Self {
        Frame::Close {
            payload: ClosePayload {
                reason: reason.into(),
            },
        }
    }

    /// Encode this frame to its JSON wire representation.
    ///
    /// Every field of every variant is a `String` or another `Serialize`
    /// type with no custom fallible `Serialize` impl, so this cannot fail —
    /// the `Result`-free signature reflects that (spec §4.1: "infallible
    /// for well-formed frames").
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Frame serialization cannot fail")
    }

    /// Same as [`Frame::encode`] but as a `String` — convenient for
    /// transports that carry text frames (e.g. WebSocket `Message::Text`).
    /// `serde_json` always produces valid UTF-8, so this cannot fail either.
    pub fn encode_text(&self) -> String {
        String::from_utf8(self.encode()).expect("serde_json output is always valid UTF-8")
    }

    /// Decode a frame from bytes, enforcing the size cap first so an
    /// oversized payload never reaches the JSON parser.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::decode_with_limit(bytes, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn decode_with_limit(bytes: &[u8], max_bytes: usize) -> Result<Self, ProtocolError> {
        if bytes.len() > max_bytes {
            return Err(ProtocolError::FrameTooLarge {
                len: bytes.len(),
                max: max_bytes,
            });
        }
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NonUtf8Payload)?;
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_every_variant() {
        let frames = vec![
            Frame::WorkstationRegister {
                payload: WorkstationRegisterPayload {
                    api_key: AuthKey::new("registration-key-32-characters!!").unwrap(),
                    name: "ws1".into(),
                    auth_key: AuthKey::new("tunnel-key-16chr").unwrap(),
                },
            },
            Frame::WorkstationRegistered {
                payload: WorkstationRegisteredPayload {
                    tunnel_id: TunnelId::new("T1").unwrap(),
                },
            },
            Frame::Connect {
                payload: ConnectPayload {
                    tunnel_id: TunnelId::new("T1").unwrap(),
                    auth_key: AuthKey::new("tunnel-key-16chr").unwrap(),
                    device_id: DeviceId::new("d1").unwrap(),
                },
            },
            Frame::Connected,
            Frame::Message {
                payload: MessagePayload {
                    device_id: Some(DeviceId::new("d1").unwrap()),
                    direction: Direction::WorkstationToClient,
                    data: "PONG-APP".into(),
                },
            },
            Frame::Ping,
            Frame::Pong,
            Frame::close("peer_gone"),
            Frame::error("protocol", "bad frame"),
        ];
        for frame in frames {
            let encoded = frame.encode();
            let decoded = Frame::decode(&encoded).expect("decode of our own encoding");
            assert_eq!(encoded, decoded.encode());
        }
    }

    #[test]
    fn rejects_over_length_tunnel_id_at_decode_time() {
        let long_id = "a".repeat(crate::MAX_TUNNEL_ID_LEN + 1);
        let bytes = format!(
            r#"{{"type":"connect","payload":{{"tunnel_id":"{long_id}","auth_key":"tunnel-key-16chr","device_id":"d1"}}}}"#
        );
        assert!(matches!(
            Frame::decode(bytes.as_bytes()),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_short_auth_key_at_decode_time() {
        let bytes = br#"{"type":"connect","payload":{"tunnel_id":"T1","auth_key":"short","device_id":"d1"}}"#;
        assert!(matches!(
            Frame::decode(bytes),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let bytes = br#"{"type":"not-a-real-type"}"#;
        assert!(matches!(
            Frame::decode(bytes),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_missing_payload_field() {
        let bytes = br#"{"type":"connect","payload":{"tunnel_id":"T1"}}"#;
        assert!(matches!(
            Frame::decode(bytes),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_utf8() {
        let bytes: &[u8] = &[0xff, 0xfe, 0xfd];
        assert!(matches!(
            Frame::decode(bytes),
            Err(ProtocolError::NonUtf8Payload)
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let huge = vec![b'a'; DEFAULT_MAX_FRAME_BYTES + 1];
        assert!(matches!(
            Frame::decode(&huge),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let _ = Frame::decode(&bytes);
        }

        #[test]
        fn decode_of_own_encoding_is_identity(data in ".{0,200}", device_id in proptest::option::of(".{1,32}")) {
            let frame = Frame::Message {
                payload: MessagePayload {
                    device_id: device_id.map(|d| DeviceId::new(d).unwrap()),
                    direction: Direction::ClientToWorkstation,
                    data,
                },
            };
            let encoded = frame.encode();
            let decoded = Frame::decode(&encoded).unwrap();
            prop_assert_eq!(encoded, decoded.encode());
        }
    }
}
