//! The liveness supervisor (C7, spec §4.5): a single periodic task that
//! pings idle sessions and escalates sessions that missed the pong deadline
//! to a `close{reason=stale}` control signal. A ping is never skipped
//! because the outbound queue is full — it shares the same bounded queue as
//! everything else, and a full queue is itself what turns a stuck peer into
//! a `slow_peer` eviction (spec's design rationale, §4.5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;
use tunnel_protocol::Frame;

use crate::config::Config;
use crate::error::SessionError;
use crate::registry::client::ClientRegistry;
use crate::registry::workstation::WorkstationRegistry;
use crate::registry::ControlSignal;

pub struct Supervisor {
    workstations: Arc<WorkstationRegistry>,
    clients: Arc<ClientRegistry>,
    ping_interval: Duration,
    stale_after: Duration,
    tick_interval: Duration,
    enqueue_deadline: Duration,
}

impl Supervisor {
    pub fn new(
        workstations: Arc<WorkstationRegistry>,
        clients: Arc<ClientRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            workstations,
            clients,
            ping_interval: config.ping_interval,
            stale_after: config.ping_interval + config.pong_timeout,
            tick_interval: config.client_timeout_check_interval,
            enqueue_deadline: config.outbound_enqueue_deadline,
        }
    }

    /// Runs the periodic sweep until the process shuts down. Exits as soon
    /// as the sender half of `shutdown` is dropped or sends `true`.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("liveness supervisor stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One sweep: ping sessions idle since `ping_interval`, and send a
    /// stale-close signal to sessions idle since `ping_interval +
    /// pong_timeout`. Both registries get the same treatment.
    pub async fn tick(&self, now: Instant) {
        self.sweep_workstations(now).await;
        self.sweep_clients(now).await;
    }

    async fn sweep_workstations(&self, now: Instant) {
        for (_, handle) in self.workstations.sweep_expired(now, self.ping_interval) {
            handle.outbound.enqueue(Frame::Ping, self.enqueue_deadline).await;
        }
        for (tunnel_id, handle) in self.workstations.sweep_expired(now, self.stale_after) {
            debug!(%tunnel_id, "workstation missed liveness deadline");
            let _ = handle
                .control
                .send(ControlSignal::Close(SessionError::Stale))
                .await;
        }
    }

    async fn sweep_clients(&self, now: Instant) {
        for (_, handle) in self.clients.sweep_expired(now, self.ping_interval) {
            handle.outbound.enqueue(Frame::Ping, self.enqueue_deadline).await;
        }
        for (device_id, handle) in self.clients.sweep_expired(now, self.stale_after) {
            debug!(%device_id, "client missed liveness deadline");
            let _ = handle
                .control
                .send(ControlSignal::Close(SessionError::Stale))
                .await;
        }
    }
}
