//! Reader-level coordination: admission, budget balancing, global backoff.
//!
//! `ReaderRdy` owns every `ConnectionRdy` for one consumer and is the only
//! place connection events are interpreted. All handlers are synchronous and
//! take an explicit `now` so tests can drive time; the loop in `run.rs`
//! supplies wall-clock instants.

use std::time::Instant;

use crate::config::ReaderConfig;

use super::backoff::BackoffTimer;
use super::conn_rdy::ConnectionRdy;
use super::round_robin::RoundRobinList;
use super::timers::{TimerEvent, TimerHandle, TimerQueue};
use super::transport::{ConnEvent, ConnectionId, RdyTransport};

/// Global flow-control state for one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No admitted connections.
    Zero,
    /// Probing with a single credit after backoff.
    TryOne,
    /// Normal operation; the full budget is distributed.
    Max,
    /// Globally throttled; every connection holds RDY 0.
    Backoff,
}

/// Coordinator that spreads `max_in_flight` across all live connections and
/// throttles globally after failures.
pub struct ReaderRdy {
    config: ReaderConfig,
    state: ReaderState,
    /// Admitted connections, in admission order.
    connections: Vec<ConnectionRdy>,
    /// Registered but not yet subscribed.
    pending: Vec<ConnectionRdy>,
    round_robin: RoundRobinList<ConnectionId>,
    backoff_timer: BackoffTimer,
    timers: TimerQueue,
    backoff_handle: Option<TimerHandle>,
    rebalance_handle: Option<TimerHandle>,
}

impl ReaderRdy {
    pub fn new(config: ReaderConfig) -> crate::Result<Self> {
        config.validate()?;
        let backoff_timer = BackoffTimer::new(config.backoff_base(), config.max_backoff());
        Ok(Self {
            config,
            state: ReaderState::Zero,
            connections: Vec::new(),
            pending: Vec::new(),
            round_robin: RoundRobinList::new(),
            backoff_timer,
            timers: TimerQueue::new(),
            backoff_handle: None,
            rebalance_handle: None,
        })
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot accessor for one admitted connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<&ConnectionRdy> {
        self.connections.iter().find(|conn| conn.id() == id)
    }

    /// Sum of per-connection in-flight counts.
    pub fn in_flight(&self) -> u64 {
        self.connections.iter().map(|conn| conn.in_flight()).sum()
    }

    /// True if at least one connection has consumed all of its credit.
    pub fn is_starved(&self) -> bool {
        self.connections.iter().any(|conn| conn.is_starved())
    }

    /// The budget is too small to grant even RDY 1 everywhere at once.
    pub fn is_low_rdy(&self) -> bool {
        (self.connections.len() as u64) > self.config.max_in_flight
    }

    /// Register a new connection. It is admitted to the active set once its
    /// `Subscribed` event arrives.
    pub fn add_connection(&mut self, transport: Box<dyn RdyTransport>) {
        let conn = ConnectionRdy::new(transport);
        tracing::debug!(conn = %conn.id(), "connection registered");
        self.pending.push(conn);
    }

    /// Drop a connection from the reader. The last removal returns the
    /// reader to `Zero`.
    pub fn remove_connection(&mut self, id: &ConnectionId, now: Instant) {
        if let Some(pos) = self.pending.iter().position(|conn| conn.id() == id) {
            self.pending.remove(pos);
            return;
        }
        let Some(pos) = self.connections.iter().position(|conn| conn.id() == id) else {
            tracing::warn!(conn = %id, "remove for unknown connection");
            return;
        };
        let mut conn = self.connections.remove(pos);
        conn.cancel_idle(&mut self.timers);
        let held_grant = conn.last_rdy_sent() > 0;
        self.round_robin.remove(id);
        tracing::info!(conn = %id, "connection removed");

        if self.connections.is_empty() {
            if self.state != ReaderState::Zero {
                self.transition(ReaderState::Zero, now);
            }
            return;
        }
        match self.state {
            // Re-enter so the survivors are re-granted, not just re-capped.
            ReaderState::Max => self.transition(ReaderState::Max, now),
            // If the probe connection left, probe another; nothing else
            // would ever raise `success` or `backoff`.
            ReaderState::TryOne if held_grant => self.enter_try_one(),
            _ => self.balance(now),
        }
    }

    /// Dispatch one connection-level event.
    pub fn handle_event(&mut self, id: &ConnectionId, event: ConnEvent, now: Instant) {
        match event {
            ConnEvent::Subscribed => self.admit(id, now),
            ConnEvent::Closed => self.remove_connection(id, now),
            ConnEvent::Message => {
                let Some(pos) = self.position(id) else {
                    tracing::warn!(conn = %id, event = ?event, "event for unknown connection");
                    return;
                };
                self.connections[pos].on_message(&mut self.timers);
            }
            ConnEvent::Finished => {
                let Some(pos) = self.position(id) else {
                    tracing::warn!(conn = %id, event = ?event, "event for unknown connection");
                    return;
                };
                self.connections[pos].on_settled();
                match self.state {
                    ReaderState::TryOne => {
                        self.backoff_timer.success();
                        self.on_message_success(pos, now);
                        self.transition(ReaderState::Max, now);
                    }
                    ReaderState::Max => {
                        self.backoff_timer.success();
                        self.on_message_success(pos, now);
                    }
                    // A finish racing the backoff trip must not re-grant
                    // credit; only the in-flight count is updated.
                    ReaderState::Zero | ReaderState::Backoff => {}
                }
            }
            ConnEvent::Requeued => {
                let Some(pos) = self.position(id) else {
                    tracing::warn!(conn = %id, event = ?event, "event for unknown connection");
                    return;
                };
                self.connections[pos].on_settled();
                // Requeues that are not part of a global backoff trip
                // restore the connection's credit. In the low-RDY regime a
                // plain bump could hand out a second scarce token, so the
                // balancer decides instead.
                if self.state != ReaderState::Backoff {
                    if self.is_low_rdy() {
                        self.balance(now);
                    } else {
                        self.connections[pos].bump();
                    }
                }
            }
            ConnEvent::Backoff => match self.state {
                ReaderState::TryOne | ReaderState::Max => {
                    self.transition(ReaderState::Backoff, now);
                }
                ReaderState::Backoff => self.enter_backoff(now),
                ReaderState::Zero => {}
            },
        }
    }

    /// Earliest pending timer deadline; the loop sleeps until then.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        for event in self.timers.drain_due(now) {
            match event {
                TimerEvent::BackoffExpired => {
                    self.backoff_handle = None;
                    if self.state == ReaderState::Backoff {
                        self.transition(ReaderState::TryOne, now);
                    }
                }
                TimerEvent::Rebalance => {
                    self.rebalance_handle = None;
                    if self.is_low_rdy()
                        && !matches!(self.state, ReaderState::Backoff | ReaderState::Zero)
                    {
                        self.balance(now);
                    }
                }
                TimerEvent::IdleSurrender(id) => {
                    let Some(pos) = self.position(&id) else {
                        continue;
                    };
                    tracing::debug!(conn = %id, "idle credit surrendered");
                    self.connections[pos].idle_fired();
                    if self.state != ReaderState::Backoff {
                        self.balance(now);
                    }
                }
            }
        }
    }

    fn position(&self, id: &ConnectionId) -> Option<usize> {
        self.connections.iter().position(|conn| conn.id() == id)
    }

    fn admit(&mut self, id: &ConnectionId, now: Instant) {
        let Some(pos) = self.pending.iter().position(|conn| conn.id() == id) else {
            tracing::warn!(conn = %id, "subscribe for unknown or already-admitted connection");
            return;
        };
        let conn = self.pending.remove(pos);
        tracing::info!(conn = %id, max_rdy = conn.max_rdy_count(), "connection admitted");
        self.round_robin.add(conn.id().clone());
        self.connections.push(conn);
        self.balance(now);

        match self.state {
            ReaderState::Zero => self.transition(ReaderState::Max, now),
            // In the low-RDY regime balance() already decided who holds the
            // scarce credit; an unconditional bump here would over-grant.
            ReaderState::TryOne | ReaderState::Max if !self.is_low_rdy() => {
                if let Some(pos) = self.position(id) {
                    self.connections[pos].bump();
                }
            }
            _ => {}
        }
    }

    fn on_message_success(&mut self, pos: usize, now: Instant) {
        if self.is_low_rdy() {
            self.balance(now);
        } else {
            self.connections[pos].bump();
        }
    }

    fn transition(&mut self, next: ReaderState, now: Instant) {
        tracing::debug!(from = ?self.state, to = ?next, "reader transition");
        self.state = next;
        match next {
            ReaderState::Zero => self.enter_zero(),
            ReaderState::TryOne => self.enter_try_one(),
            ReaderState::Max => self.enter_max(now),
            ReaderState::Backoff => self.enter_backoff(now),
        }
    }

    fn enter_zero(&mut self) {
        if let Some(handle) = self.backoff_handle.take() {
            self.timers.cancel(handle);
        }
        if let Some(handle) = self.rebalance_handle.take() {
            self.timers.cancel(handle);
        }
    }

    /// Probe with a single credit, rotating so repeated probes spread
    /// across connections.
    fn enter_try_one(&mut self) {
        for id in self.round_robin.next(1) {
            if let Some(pos) = self.position(&id) {
                self.connections[pos].bump();
            }
        }
    }

    /// Re-derive caps before bumping: a probe or a membership change while
    /// throttled can leave stale per-connection caps behind. In the low-RDY
    /// regime balance() itself decides who is granted, so the broad bump is
    /// skipped.
    fn enter_max(&mut self, now: Instant) {
        self.balance(now);
        if !self.is_low_rdy() {
            for conn in &mut self.connections {
                conn.bump();
            }
        }
    }

    fn enter_backoff(&mut self, now: Instant) {
        self.backoff_timer.failure();
        for conn in &mut self.connections {
            conn.cancel_idle(&mut self.timers);
            conn.backoff();
        }
        if let Some(handle) = self.rebalance_handle.take() {
            self.timers.cancel(handle);
        }
        if let Some(handle) = self.backoff_handle.take() {
            self.timers.cancel(handle);
        }
        let interval = self.backoff_timer.interval();
        self.backoff_handle = Some(
            self.timers
                .schedule(now + interval, TimerEvent::BackoffExpired),
        );
        tracing::warn!(interval_ms = interval.as_millis() as u64, "entering backoff");
    }

    /// Apportion the budget across connections.
    ///
    /// With `per_conn >= 1` each connection gets an even share (the first
    /// `max_in_flight % n` get one extra). Below that the budget cannot
    /// cover every connection and credit becomes a traveling token handed
    /// around by the round-robin cursor.
    pub(crate) fn balance(&mut self, now: Instant) {
        if self.connections.is_empty() {
            if let Some(handle) = self.rebalance_handle.take() {
                self.timers.cancel(handle);
            }
            return;
        }
        let count = self.connections.len() as u64;
        let budget = if self.state == ReaderState::TryOne {
            1
        } else {
            self.config.max_in_flight
        };
        let per_conn = budget / count;
        tracing::debug!(budget, connections = count, per_conn, "balance");
        if per_conn == 0 {
            self.balance_low_rdy(budget, now);
        } else {
            self.balance_even(per_conn, count);
        }
    }

    fn balance_even(&mut self, per_conn: u64, count: u64) {
        // Leaving the low-RDY regime stops the periodic rebalance.
        if let Some(handle) = self.rebalance_handle.take() {
            self.timers.cancel(handle);
        }
        let mut remainder = self.config.max_in_flight % count;
        for conn in &mut self.connections {
            let mut cap = per_conn;
            if remainder > 0 {
                cap += 1;
                remainder -= 1;
            }
            conn.set_connection_rdy_max(cap);
        }
    }

    fn balance_low_rdy(&mut self, budget: u64, now: Instant) {
        let throttled = self.state == ReaderState::Backoff;
        for conn in &mut self.connections {
            // A connection holding a live single-credit grant (idle timer
            // still armed) keeps it untouched: the token only moves on that
            // connection's own message, surrender, or a global throttle.
            // Everything else - stale normal-regime grants included - has
            // its credit withdrawn. During a global throttle the caps are
            // still normalized, but nothing is granted until recovery.
            if !throttled && !conn.idle_armed() {
                conn.backoff();
            }
            conn.set_connection_rdy_max(1);
        }
        if throttled {
            return;
        }

        // Only the shortfall is granted; in-flight messages and live
        // holders already account for their share of the budget.
        let holding = self.connections.iter().filter(|c| c.idle_armed()).count() as u64;
        let available = budget
            .saturating_sub(self.in_flight())
            .saturating_sub(holding) as usize;
        let idle_at = now + self.config.low_rdy_idle_timeout();
        let mut granted = 0;
        let mut scanned = 0;
        let total = self.round_robin.len();
        while granted < available && scanned < total {
            let Some(id) = self.round_robin.next(1).into_iter().next() else {
                break;
            };
            scanned += 1;
            let Some(pos) = self.position(&id) else {
                continue;
            };
            if self.connections[pos].idle_armed() {
                continue;
            }
            self.connections[pos].bump();
            self.connections[pos].backoff_on_idle(idle_at, &mut self.timers);
            granted += 1;
        }

        // Safety net for the eventless case: without it the cursor would
        // never advance once every granted connection goes quiet.
        if let Some(handle) = self.rebalance_handle.take() {
            self.timers.cancel(handle);
        }
        self.rebalance_handle = Some(
            self.timers
                .schedule(now + self.config.low_rdy_rebalance(), TimerEvent::Rebalance),
        );
    }
}
