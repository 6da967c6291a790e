//! `ClientRegistry` (C4): DeviceId → mobile client session, plus the
//! `by_tunnel` secondary index used by workstation-removal cascade and
//! (optionally) broadcast-to-all-clients control frames.
//!
//! Unlike `WorkstationRegistry`, inserts here must keep two maps in sync
//! (the by-id map and the by-tunnel index), so this one is a single
//! `std::sync::Mutex`-guarded `HashMap` pair rather than a `DashMap` — the
//! mutex's critical section covers exactly the structural mutation, never
//! an await (spec §4.2, §5).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tunnel_protocol::{DeviceId, TunnelId};

use super::{control_channel, ControlSender, LastSeen};
use crate::session::OutboundQueue;

struct ClientEntry {
    tunnel_id: TunnelId,
    outbound: OutboundQueue,
    control: ControlSender,
    last_seen: LastSeen,
}

#[derive(Clone)]
pub struct ClientHandle {
    pub tunnel_id: TunnelId,
    pub outbound: OutboundQueue,
    pub control: ControlSender,
    pub last_seen: LastSeen,
}

fn handle_from(entry: &ClientEntry) -> ClientHandle {
    ClientHandle {
        tunnel_id: entry.tunnel_id.clone(),
        outbound: entry.outbound.clone(),
        control: entry.control.clone(),
        last_seen: entry.last_seen.clone(),
    }
}

#[derive(Default)]
struct Inner {
    by_device: HashMap<DeviceId, ClientEntry>,
    by_tunnel: HashMap<TunnelId, HashSet<DeviceId>>,
}

pub struct ClientRegistry {
    inner: Mutex<Inner>,
}

/// Outcome of inserting a client: whether a prior session for the same
/// `device_id` was evicted (spec §4.3 scenario 5, `close{reason=replaced}`).
pub struct InsertResult {
    pub replaced: Option<ClientHandle>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Inserts a client bound to `tunnel_id`, evicting any prior session for
    /// the same `device_id` (invariant 2 restored by construction: the new
    /// entry always wins the key).
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        device_id: DeviceId,
        tunnel_id: TunnelId,
        outbound_capacity: usize,
        now: Instant,
    ) -> (
        ClientHandle,
        tokio::sync::mpsc::Receiver<tunnel_protocol::Frame>,
        super::ControlReceiver,
        InsertResult,
    ) {
        let (outbound, outbound_rx) = OutboundQueue::new(outbound_capacity);
        let (control, control_rx) = control_channel();
        let entry = ClientEntry {
            tunnel_id: tunnel_id.clone(),
            outbound,
            control,
            last_seen: LastSeen::new(now),
        };
        let handle = handle_from(&entry);

        let mut guard = self.inner.lock().expect("client registry mutex poisoned");
        let replaced_entry = guard.by_device.insert(device_id.clone(), entry);
        if let Some(old) = &replaced_entry {
            if let Some(set) = guard.by_tunnel.get_mut(&old.tunnel_id) {
                set.remove(&device_id);
                if set.is_empty() {
                    guard.by_tunnel.remove(&old.tunnel_id);
                }
            }
        }
        guard
            .by_tunnel
            .entry(tunnel_id)
            .or_default()
            .insert(device_id);
        drop(guard);

        let replaced = replaced_entry.as_ref().map(handle_from);
        (handle, outbound_rx, control_rx, InsertResult { replaced })
    }

    pub fn remove(&self, device_id: &DeviceId) -> Option<ClientHandle> {
        let mut guard = self.inner.lock().expect("client registry mutex poisoned");
        let entry = guard.by_device.remove(device_id)?;
        if let Some(set) = guard.by_tunnel.get_mut(&entry.tunnel_id) {
            set.remove(device_id);
            if set.is_empty() {
                guard.by_tunnel.remove(&entry.tunnel_id);
            }
        }
        Some(handle_from(&entry))
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<ClientHandle> {
        let guard = self.inner.lock().expect("client registry mutex poisoned");
        guard.by_device.get(device_id).map(handle_from)
    }

    pub fn by_tunnel(&self, tunnel_id: &TunnelId) -> Vec<(DeviceId, ClientHandle)> {
        let guard = self.inner.lock().expect("client registry mutex poisoned");
        guard
            .by_tunnel
            .get(tunnel_id)
            .into_iter()
            .flatten()
            .filter_map(|device_id| {
                guard
                    .by_device
                    .get(device_id)
                    .map(|entry| (device_id.clone(), handle_from(entry)))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("client registry mutex poisoned").by_device.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sweep_expired(&self, now: Instant, timeout: Duration) -> Vec<(DeviceId, ClientHandle)> {
        let guard = self.inner.lock().expect("client registry mutex poisoned");
        guard
            .by_device
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed(now) >= timeout)
            .map(|(device_id, entry)| (device_id.clone(), handle_from(entry)))
            .collect()
    }

    /// Every currently registered session — used by the server façade's
    /// shutdown broadcast (spec §4.6).
    pub fn all(&self) -> Vec<(DeviceId, ClientHandle)> {
        let guard = self.inner.lock().expect("client registry mutex poisoned");
        guard
            .by_device
            .iter()
            .map(|(device_id, entry)| (device_id.clone(), handle_from(entry)))
            .collect()
    }
}
