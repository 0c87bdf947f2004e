//! Flow-control core: per-connection credit, budget balancing, global
//! backoff.
//!
//! Provides:
//! - `ConnectionRdy` - per-connection RDY state machine
//! - `ReaderRdy` - consumer-level coordinator and balancer
//! - `run_flow_loop` - the single serialization thread

pub mod backoff;
pub mod conn_rdy;
pub mod reader;
pub mod round_robin;
pub mod run;
pub mod timers;
pub mod transport;

pub use backoff::BackoffTimer;
pub use conn_rdy::{ConnState, ConnectionRdy};
pub use reader::{ReaderRdy, ReaderState};
pub use round_robin::RoundRobinList;
pub use run::run_flow_loop;
pub use timers::{TimerEvent, TimerHandle, TimerQueue};
pub use transport::{ConnEvent, ConnectionId, FlowCommand, RdyTransport};
