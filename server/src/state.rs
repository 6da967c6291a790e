//! Shared application state (spec §9 design notes: the registries and the
//! global registration key are process-wide, initialized once at startup,
//! and never mutated after that beyond the registries' own insert/remove).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::registry::client::ClientRegistry;
use crate::registry::workstation::WorkstationRegistry;

/// Cloned and passed to every axum handler. Cheap to clone: everything
/// inside is already an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub workstations: Arc<WorkstationRegistry>,
    pub clients: Arc<ClientRegistry>,
    pub started_at: Instant,
    dropped_messages: Arc<AtomicU64>,
    supervisor_running: Arc<AtomicBool>,
    acceptor_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            workstations: Arc::new(WorkstationRegistry::new()),
            clients: Arc::new(ClientRegistry::new()),
            started_at: Instant::now(),
            dropped_messages: Arc::new(AtomicU64::new(0)),
            supervisor_running: Arc::new(AtomicBool::new(false)),
            acceptor_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dropped_messages_ref(&self) -> &AtomicU64 {
        &self.dropped_messages
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn mark_supervisor_running(&self, running: bool) {
        self.supervisor_running.store(running, Ordering::SeqCst);
    }

    pub fn mark_acceptor_running(&self, running: bool) {
        self.acceptor_running.store(running, Ordering::SeqCst);
    }

    /// `/readyz` is 200 only once both the supervisor and the acceptor are
    /// up (spec §6).
    pub fn is_ready(&self) -> bool {
        self.supervisor_running.load(Ordering::SeqCst) && self.acceptor_running.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
