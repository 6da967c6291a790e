//! Validated opaque identifiers shared by every layer of the fabric.
//!
//! `TunnelId` and `DeviceId` are plain byte-equality values. `AuthKey` is the
//! one type that carries a secret: two keys are only ever compared in
//! constant time, and its `Debug` impl never prints the plaintext.

use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::ProtocolError;

/// Maximum byte length of a [`TunnelId`].
pub const MAX_TUNNEL_ID_LEN: usize = 64;

/// Minimum byte length of an [`AuthKey`].
pub const MIN_AUTH_KEY_LEN: usize = 16;

/// Server-generated opaque identifier binding a workstation uplink to its
/// bound mobile clients. Compares by byte equality.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TunnelId(String);

impl TunnelId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let trimmed = raw.into().trim().to_string();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidIdentifier("tunnel_id", "empty"));
        }
        if trimmed.len() > MAX_TUNNEL_ID_LEN {
            return Err(ProtocolError::InvalidIdentifier("tunnel_id", "too long"));
        }
        Ok(Self(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TunnelId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TunnelId> for String {
    fn from(value: TunnelId) -> Self {
        value.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TunnelId({:?})", self.0)
    }
}

/// Client-chosen identifier, unique within the `ClientRegistry`. A second
/// `connect` with the same `DeviceId` evicts the first.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ProtocolError::InvalidIdentifier("device_id", "empty"));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({:?})", self.0)
    }
}

/// A secret: either the process-wide registration key or a per-workstation
/// tunnel auth key. Equality is always constant-time over the byte length
/// that is actually compared; a length mismatch short-circuits to `false`
/// without touching the shorter buffer's remaining bytes.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AuthKey(String);

impl AuthKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        if raw.len() < MIN_AUTH_KEY_LEN {
            return Err(ProtocolError::InvalidIdentifier("auth_key", "too short"));
        }
        if !raw.chars().all(is_printable_ascii) {
            return Err(ProtocolError::InvalidIdentifier("auth_key", "not printable"));
        }
        Ok(Self(raw))
    }

    /// Constant-time comparison. Returns `false` immediately on length
    /// mismatch (lengths are not the secret; the key bytes are).
    pub fn secure_eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_printable_ascii(c: char) -> bool {
    c.is_ascii_graphic() || c == ' '
}

impl TryFrom<String> for AuthKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AuthKey> for String {
    fn from(value: AuthKey) -> Self {
        value.0
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.secure_eq(other)
    }
}

impl Eq for AuthKey {}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthKey(<{} bytes redacted>)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_id_trims_and_rejects_empty() {
        assert_eq!(TunnelId::new("  abc  ").unwrap().as_str(), "abc");
        assert!(TunnelId::new("   ").is_err());
    }

    #[test]
    fn tunnel_id_rejects_too_long() {
        let long = "a".repeat(MAX_TUNNEL_ID_LEN + 1);
        assert!(TunnelId::new(long).is_err());
    }

    #[test]
    fn device_id_rejects_empty() {
        assert!(DeviceId::new("").is_err());
        assert!(DeviceId::new("d1").is_ok());
    }

    #[test]
    fn auth_key_rejects_short() {
        assert!(AuthKey::new("short").is_err());
        assert!(AuthKey::new("exactly-16-chars").is_ok());
    }

    #[test]
    fn auth_key_equal_values_compare_equal() {
        let a = AuthKey::new("tunnel-key-16chr").unwrap();
        let b = AuthKey::new("tunnel-key-16chr").unwrap();
        assert!(a.secure_eq(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn auth_key_different_length_never_equal() {
        let a = AuthKey::new("short-but-valid!").unwrap();
        let b = AuthKey::new("short-but-valid!!!!!!!!!").unwrap();
        assert!(!a.secure_eq(&b));
    }

    #[test]
    fn auth_key_debug_never_leaks_plaintext() {
        let key = AuthKey::new("super-secret-key").unwrap();
        assert!(!format!("{key:?}").contains("super-secret-key"));
    }
}
