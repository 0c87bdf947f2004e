//! Per-connection credit state machine.
//!
//! One `ConnectionRdy` tracks the RDY value granted to a single broker
//! connection. The reader-level coordinator owns these and drives them with
//! `bump` / `backoff` / cap adjustments; the wire layer feeds message and
//! settlement events through the coordinator.

use std::time::Instant;

use super::timers::{TimerEvent, TimerHandle, TimerQueue};
use super::transport::{ConnectionId, RdyTransport};

/// Lifecycle of one connection's credit grant.
///
/// `One` exists so a newly-unblocked connection probes with a single credit
/// before being trusted with its full share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Never granted; RDY implicitly 0.
    Init,
    /// Credit withdrawn; RDY 0 on the wire.
    Backoff,
    /// Probing with a single credit.
    One,
    /// Granted its full cap.
    Max,
}

/// Credit controller for one broker connection.
pub struct ConnectionRdy {
    transport: Box<dyn RdyTransport>,
    id: ConnectionId,
    max_rdy_count: u64,
    max_conn_rdy: u64,
    in_flight: u64,
    last_rdy_sent: u64,
    idle_timer: Option<TimerHandle>,
    state: ConnState,
}

impl ConnectionRdy {
    pub fn new(transport: Box<dyn RdyTransport>) -> Self {
        let id = transport.id().clone();
        let max_rdy_count = transport.max_rdy_count();
        Self {
            transport,
            id,
            max_rdy_count,
            max_conn_rdy: 0,
            in_flight: 0,
            last_rdy_sent: 0,
            idle_timer: None,
            state: ConnState::Init,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn max_rdy_count(&self) -> u64 {
        self.max_rdy_count
    }

    pub fn max_conn_rdy(&self) -> u64 {
        self.max_conn_rdy
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    pub fn last_rdy_sent(&self) -> u64 {
        self.last_rdy_sent
    }

    /// True when the connection has consumed every credit it was granted.
    pub fn is_starved(&self) -> bool {
        self.max_conn_rdy > 0 && self.in_flight == self.max_conn_rdy
    }

    /// "You may increase credit."
    pub fn bump(&mut self) {
        match self.state {
            ConnState::Init | ConnState::Backoff if self.max_conn_rdy == 0 => {}
            ConnState::Init => self.transition(ConnState::Max),
            ConnState::Backoff => self.transition(ConnState::One),
            ConnState::One => self.transition(ConnState::Max),
            ConnState::Max => self.send_rdy(self.max_conn_rdy),
        }
    }

    /// "Drop credit to zero now."
    pub fn backoff(&mut self) {
        match self.state {
            ConnState::One | ConnState::Max => self.transition(ConnState::Backoff),
            ConnState::Init | ConnState::Backoff => {}
        }
    }

    /// Request a new cap; the effective cap is clamped to the broker's
    /// advertised ceiling. A changed cap is pushed to the broker immediately
    /// when the machine is in `Max`; otherwise it takes effect on the next
    /// `Max` entry.
    pub fn set_connection_rdy_max(&mut self, requested: u64) {
        let cap = requested.min(self.max_rdy_count);
        if cap == self.max_conn_rdy {
            return;
        }
        self.max_conn_rdy = cap;
        if self.state == ConnState::Max {
            self.send_rdy(cap);
        }
    }

    /// Arm a one-shot timer that asks this connection to surrender its
    /// credit if no message arrives before `at`. Any incoming message
    /// cancels it.
    pub fn backoff_on_idle(&mut self, at: Instant, timers: &mut TimerQueue) {
        self.cancel_idle(timers);
        self.idle_timer = Some(timers.schedule(at, TimerEvent::IdleSurrender(self.id.clone())));
    }

    pub(crate) fn cancel_idle(&mut self, timers: &mut TimerQueue) {
        if let Some(handle) = self.idle_timer.take() {
            timers.cancel(handle);
        }
    }

    /// True while a low-RDY grant is live: armed on grant, disarmed by the
    /// first message, by surrender, or by a global throttle.
    pub(crate) fn idle_armed(&self) -> bool {
        self.idle_timer.is_some()
    }

    pub(crate) fn idle_fired(&mut self) {
        self.idle_timer = None;
        self.backoff();
    }

    pub(crate) fn on_message(&mut self, timers: &mut TimerQueue) {
        self.cancel_idle(timers);
        self.in_flight += 1;
        debug_assert!(
            self.in_flight <= self.max_rdy_count,
            "in-flight above broker ceiling on {}",
            self.id
        );
    }

    /// A message finished or was requeued.
    pub(crate) fn on_settled(&mut self) {
        debug_assert!(self.in_flight > 0, "in-flight underflow on {}", self.id);
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn transition(&mut self, next: ConnState) {
        tracing::debug!(conn = %self.id, from = ?self.state, to = ?next, "connection transition");
        self.state = next;
        match next {
            ConnState::Init => {}
            ConnState::Backoff => self.send_rdy(0),
            ConnState::One => self.send_rdy(1),
            // Entering Max raises a bump, which lands in the Max self-loop.
            ConnState::Max => self.bump(),
        }
    }

    /// Transmit only in-range values; always record the attempt so a cap
    /// lowered after the decision to send still leaves a trace.
    fn send_rdy(&mut self, count: u64) {
        if count <= self.max_conn_rdy {
            tracing::debug!(conn = %self.id, rdy = count, "send RDY");
            self.transport.send_rdy(count);
        }
        self.last_rdy_sent = count;
    }
}
