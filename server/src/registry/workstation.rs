//! `WorkstationRegistry` (C3): TunnelId → workstation session. A single
//! `DashMap` gives lock-free reads and short-held per-key write locks, so no
//! I/O ever happens under a registry lock (spec §4.2, §5).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tunnel_protocol::{AuthKey, TunnelId};

use super::{control_channel, ControlSender, InsertOutcome, LastSeen};
use crate::session::OutboundQueue;

struct WorkstationEntry {
    tunnel_auth_key: AuthKey,
    display_name: String,
    outbound: OutboundQueue,
    control: ControlSender,
    last_seen: LastSeen,
}

/// Access handle for a workstation session: everything a caller outside the
/// owning session is allowed to touch. No structural mutation of the
/// stream is reachable through it (spec §3, Ownership).
#[derive(Clone)]
pub struct WorkstationHandle {
    pub display_name: String,
    pub outbound: OutboundQueue,
    pub control: ControlSender,
    pub last_seen: LastSeen,
}

fn handle_from(entry: &WorkstationEntry) -> WorkstationHandle {
    WorkstationHandle {
        display_name: entry.display_name.clone(),
        outbound: entry.outbound.clone(),
        control: entry.control.clone(),
        last_seen: entry.last_seen.clone(),
    }
}

pub struct WorkstationRegistry {
    map: DashMap<TunnelId, WorkstationEntry>,
}

impl Default for WorkstationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkstationRegistry {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Registers a fresh session, returning its control receiver and
    /// outbound receiver for the caller to drive. Fails with `Conflict` if
    /// `tunnel_id` is already present (invariant 1).
    #[allow(clippy::type_complexity)]
    pub fn insert(
        &self,
        tunnel_id: TunnelId,
        tunnel_auth_key: AuthKey,
        display_name: String,
        outbound_capacity: usize,
        now: Instant,
    ) -> Result<
        (
            WorkstationHandle,
            tokio::sync::mpsc::Receiver<tunnel_protocol::Frame>,
            super::ControlReceiver,
        ),
        InsertOutcome,
    > {
        match self.map.entry(tunnel_id) {
            Entry::Occupied(_) => Err(InsertOutcome::Conflict),
            Entry::Vacant(slot) => {
                let (outbound, outbound_rx) = OutboundQueue::new(outbound_capacity);
                let (control, control_rx) = control_channel();
                let entry = WorkstationEntry {
                    tunnel_auth_key,
                    display_name,
                    outbound,
                    control,
                    last_seen: LastSeen::new(now),
                };
                let handle = handle_from(&entry);
                slot.insert(entry);
                Ok((handle, outbound_rx, control_rx))
            }
        }
    }

    pub fn remove(&self, tunnel_id: &TunnelId) -> Option<WorkstationHandle> {
        self.map.remove(tunnel_id).map(|(_, entry)| handle_from(&entry))
    }

    pub fn get(&self, tunnel_id: &TunnelId) -> Option<WorkstationHandle> {
        self.map.get(tunnel_id).map(|entry| handle_from(&entry))
    }

    /// Looks up `tunnel_id` and, only on a constant-time key match, returns
    /// the handle. The stored key is never exposed to the caller.
    pub fn validate(&self, tunnel_id: &TunnelId, presented: &AuthKey) -> Option<WorkstationHandle> {
        let entry = self.map.get(tunnel_id)?;
        if entry.tunnel_auth_key.secure_eq(presented) {
            Some(handle_from(&entry))
        } else {
            None
        }
    }

    pub fn contains(&self, tunnel_id: &TunnelId) -> bool {
        self.map.contains_key(tunnel_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sessions whose `last_seen_at + timeout <= now`. Does not remove them
    /// — removal is the responsibility of the session's own closer, once it
    /// reacts to the control signal this is normally paired with.
    pub fn sweep_expired(&self, now: Instant, timeout: Duration) -> Vec<(TunnelId, WorkstationHandle)> {
        self.map
            .iter()
            .filter(|entry| entry.last_seen.elapsed(now) >= timeout)
            .map(|entry| (entry.key().clone(), handle_from(entry.value())))
            .collect()
    }

    /// Every currently registered session, regardless of liveness — used by
    /// the server façade's shutdown broadcast (spec §4.6).
    pub fn all(&self) -> Vec<(TunnelId, WorkstationHandle)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), handle_from(entry.value())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_protocol::Frame;

    fn key() -> AuthKey {
        AuthKey::new("tunnel-key-16chr").unwrap()
    }

    #[tokio::test]
    async fn insert_then_conflict() {
        let registry = WorkstationRegistry::new();
        let id = TunnelId::new("T1").unwrap();
        let now = Instant::now();
        assert!(registry
            .insert(id.clone(), key(), "ws1".into(), 4, now)
            .is_ok());
        let err = registry.insert(id, key(), "ws1-again".into(), 4, now);
        assert_eq!(err.unwrap_err(), InsertOutcome::Conflict);
    }

    #[tokio::test]
    async fn validate_rejects_wrong_key() {
        let registry = WorkstationRegistry::new();
        let id = TunnelId::new("T1").unwrap();
        registry
            .insert(id.clone(), key(), "ws1".into(), 4, Instant::now())
            .unwrap();
        let wrong = AuthKey::new("wrong-key-16char").unwrap();
        assert!(registry.validate(&id, &wrong).is_none());
        assert!(registry.validate(&id, &key()).is_some());
    }

    #[tokio::test]
    async fn remove_drops_entry_and_invariant_1_holds() {
        let registry = WorkstationRegistry::new();
        let id = TunnelId::new("T1").unwrap();
        registry
            .insert(id.clone(), key(), "ws1".into(), 4, Instant::now())
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn sweep_expired_returns_stale_handles_without_removing() {
        let registry = WorkstationRegistry::new();
        let id = TunnelId::new("T1").unwrap();
        let start = Instant::now();
        registry
            .insert(id.clone(), key(), "ws1".into(), 4, start)
            .unwrap();
        let later = start + Duration::from_secs(20);
        let stale = registry.sweep_expired(later, Duration::from_secs(15));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, id);
        assert!(registry.contains(&id));
    }

    #[tokio::test]
    async fn handle_outbound_round_trips_a_frame() {
        let registry = WorkstationRegistry::new();
        let id = TunnelId::new("T1").unwrap();
        let (handle, mut rx, _control_rx) = registry
            .insert(id, key(), "ws1".into(), 4, Instant::now())
            .unwrap();
        handle
            .outbound
            .enqueue(Frame::Ping, Duration::from_millis(50))
            .await;
        assert!(matches!(rx.recv().await, Some(Frame::Ping)));
    }
}
