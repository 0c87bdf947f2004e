#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod flow;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the core surface at crate root for convenience
pub use crate::config::{ConfigError, ReaderConfig};
pub use crate::flow::{
    run_flow_loop, BackoffTimer, ConnEvent, ConnState, ConnectionId, ConnectionRdy, FlowCommand,
    RdyTransport, ReaderRdy, ReaderState, RoundRobinList, TimerEvent, TimerHandle, TimerQueue,
};
