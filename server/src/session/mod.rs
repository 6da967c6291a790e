//! The shared session skeleton (C5, spec §4.3): state enum and the bounded
//! outbound queue whose backpressure discipline is the one mechanism that
//! protects a healthy peer from a stuck one.

pub mod client;
pub mod workstation;

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;
use tunnel_protocol::Frame;

/// Lifecycle states shared by both workstation and client sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Live,
    Draining,
    Closed,
}

/// What a `Live`-state inbound frame should do next.
pub enum Inbound {
    /// Handled in place (e.g. a `pong` that only refreshed `last_seen_at`).
    Continue,
    /// Send this frame back on the same stream (e.g. `ping` -> `pong`).
    Reply(Frame),
    /// Stop reading and begin draining, closing with this reason. Used for
    /// drains that are not themselves a protocol violation (a peer-sent
    /// `close`, or an escalated `slow_peer`).
    Drain(&'static str),
    /// A disallowed direction tag or unrecognized frame type: send
    /// `error.protocol` with this message, then drain closing `protocol`
    /// (spec §4.3, §7).
    ProtocolViolation(String),
}

/// Outcome of a single bounded-queue enqueue attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Sent,
    /// The receiver is gone; the session is already torn down.
    Closed,
    /// The queue was full for the whole deadline; the frame was dropped and
    /// the session should be marked `slow`.
    TimedOut,
}

/// A session's outbound mailbox. Producers (the router, the supervisor, the
/// session's own handshake replies) enqueue with a deadline; on timeout the
/// frame is dropped and the caller is told to mark the session `slow`.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Frame>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn enqueue(&self, frame: Frame, deadline: Duration) -> EnqueueOutcome {
        match tokio::time::timeout(deadline, self.tx.send(frame)).await {
            Ok(Ok(())) => EnqueueOutcome::Sent,
            Ok(Err(_)) => EnqueueOutcome::Closed,
            Err(_) => {
                warn!("outbound queue enqueue timed out; frame dropped");
                EnqueueOutcome::TimedOut
            }
        }
    }
}

/// Tracks consecutive `slow` marks; two in a row escalate to Draining with
/// `error.slow_peer` (spec §4.3).
#[derive(Debug, Default, Clone, Copy)]
pub struct SlownessTracker {
    consecutive_slow_marks: u8,
}

impl SlownessTracker {
    pub const ESCALATION_THRESHOLD: u8 = 2;

    pub fn record(&mut self, outcome: &EnqueueOutcome) -> bool {
        match outcome {
            EnqueueOutcome::TimedOut => {
                self.consecutive_slow_marks += 1;
                self.consecutive_slow_marks >= Self::ESCALATION_THRESHOLD
            }
            EnqueueOutcome::Sent => {
                self.consecutive_slow_marks = 0;
                false
            }
            EnqueueOutcome::Closed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_succeeds_under_capacity() {
        let (queue, mut rx) = OutboundQueue::new(4);
        let outcome = queue.enqueue(Frame::Ping, Duration::from_millis(50)).await;
        assert_eq!(outcome, EnqueueOutcome::Sent);
        assert!(matches!(rx.recv().await, Some(Frame::Ping)));
    }

    #[tokio::test]
    async fn enqueue_times_out_when_full() {
        let (queue, _rx) = OutboundQueue::new(1);
        queue.enqueue(Frame::Ping, Duration::from_millis(50)).await;
        let outcome = queue.enqueue(Frame::Ping, Duration::from_millis(20)).await;
        assert_eq!(outcome, EnqueueOutcome::TimedOut);
    }

    #[test]
    fn slowness_escalates_after_two_consecutive_timeouts() {
        let mut tracker = SlownessTracker::default();
        assert!(!tracker.record(&EnqueueOutcome::TimedOut));
        assert!(tracker.record(&EnqueueOutcome::TimedOut));
    }

    #[test]
    fn slowness_resets_on_success() {
        let mut tracker = SlownessTracker::default();
        tracker.record(&EnqueueOutcome::TimedOut);
        assert!(!tracker.record(&EnqueueOutcome::Sent));
        assert!(!tracker.record(&EnqueueOutcome::TimedOut));
    }
}
