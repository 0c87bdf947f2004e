//! Single-shot deadline timers for the flow-control loop.
//!
//! Deadlines live in a min-heap beside a `pending` map keyed by token.
//! Cancellation removes the token; the heap drops stale entries lazily on
//! the next peek. The loop asks for `next_deadline()` to size its sleep and
//! calls `drain_due(now)` when it wakes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use super::transport::ConnectionId;

/// Timer firings dispatched by the flow-control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// The global backoff interval elapsed; probe with one connection.
    BackoffExpired,
    /// Periodic low-RDY rebalance tick.
    Rebalance,
    /// A connection held credit without receiving a message for too long.
    IdleSurrender(ConnectionId),
}

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

/// Single-shot timer queue.
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    pending: HashMap<u64, TimerEvent>,
    next_token: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_token: 0,
        }
    }

    /// Schedule `event` to fire at `at`. The handle stays valid until the
    /// timer fires or is cancelled.
    pub fn schedule(&mut self, at: Instant, event: TimerEvent) -> TimerHandle {
        let token = self.next_token;
        self.next_token += 1;
        self.pending.insert(token, event);
        self.heap.push(Reverse((at, token)));
        TimerHandle(token)
    }

    /// Cancel a previously scheduled timer. Cancelling an already-fired
    /// handle is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.pending.remove(&handle.0);
    }

    /// Earliest live deadline, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.pop_stale();
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return every timer due at `now`, in firing order.
    pub fn drain_due(&mut self, now: Instant) -> Vec<TimerEvent> {
        let mut due = Vec::new();
        loop {
            self.pop_stale();
            let Some(Reverse((at, token))) = self.heap.peek().copied() else {
                break;
            };
            if at > now {
                break;
            }
            let _ = self.heap.pop();
            if let Some(event) = self.pending.remove(&token) {
                due.push(event);
            }
        }
        due
    }

    /// True when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn pop_stale(&mut self) {
        while let Some(Reverse((_, token))) = self.heap.peek() {
            if self.pending.contains_key(token) {
                break;
            }
            let _ = self.heap.pop();
        }
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}
