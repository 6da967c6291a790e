//! Shared registry plumbing (C3/C4, spec §4.2): the liveness clock and the
//! control-channel signal used by the supervisor to reach into a session
//! without ever touching its stream directly.

pub mod client;
pub mod workstation;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::error::SessionError;

/// Outcome of a registry `insert`.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// A signal the supervisor (or another session, on cascade) injects into a
/// session's control channel. The session polls this alongside inbound
/// frames; receiving one drives it into `Draining` exactly as a
/// self-initiated close would.
#[derive(Debug, Clone)]
pub enum ControlSignal {
    Close(SessionError),
}

pub type ControlSender = mpsc::Sender<ControlSignal>;
pub type ControlReceiver = mpsc::Receiver<ControlSignal>;

/// Shared, cheaply-cloned liveness clock. Invariant 6 (spec §3): advances
/// monotonically for a given session — `touch` only ever moves it forward in
/// practice because callers always pass the current `Instant`.
#[derive(Clone)]
pub struct LastSeen(Arc<Mutex<Instant>>);

impl LastSeen {
    pub fn new(now: Instant) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    pub fn touch(&self, now: Instant) {
        let mut guard = self.0.lock().expect("last_seen mutex poisoned");
        if now > *guard {
            *guard = now;
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let guard = self.0.lock().expect("last_seen mutex poisoned");
        now.saturating_duration_since(*guard)
    }
}

pub fn control_channel() -> (ControlSender, ControlReceiver) {
    mpsc::channel(4)
}
