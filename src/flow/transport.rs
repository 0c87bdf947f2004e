//! Wire-connection contract and the closed connection-event set.
//!
//! The wire layer owns sockets, framing, and the subscribe handshake. The
//! flow-control core only needs to push RDY values down and observe a small
//! set of typed events coming back up.

use std::fmt;

/// Stable identifier for one broker connection, e.g. `host:port`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({:?})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capabilities the core needs from a live broker connection.
///
/// `send_rdy` must put the RDY command on the wire in call order; the wire
/// layer serializes writes. The handle is non-owning: dropping it must not
/// close the socket.
pub trait RdyTransport: Send {
    /// Stable identifier used in logs and round-robin bookkeeping.
    fn id(&self) -> &ConnectionId;

    /// Broker-advertised RDY ceiling for this connection (>= 1).
    fn max_rdy_count(&self) -> u64;

    /// Emit an RDY command with the given count.
    fn send_rdy(&self, count: u64);
}

/// Connection-level events observed by the flow-control core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// A message was delivered to the application.
    Message,
    /// The application finished a message successfully.
    Finished,
    /// The application requeued a message.
    Requeued,
    /// The subscribe handshake completed; the connection is live.
    Subscribed,
    /// The connection asked for a global throttle (failed message).
    Backoff,
    /// The connection is gone (wire error or orderly close).
    Closed,
}

/// Message sent from wire-layer handlers to the flow-control thread.
pub enum FlowCommand {
    /// Hand a new connection's transport to the core. The connection is
    /// admitted once its `Subscribed` event arrives.
    Register(Box<dyn RdyTransport>),
    /// A connection-level event.
    Event {
        conn: ConnectionId,
        event: ConnEvent,
    },
}
