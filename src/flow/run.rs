//! The flow-control loop (single serialization point).
//!
//! All state transitions, event handlers, and timer callbacks for one
//! `ReaderRdy` run on the thread that calls `run_flow_loop`. Wire-layer
//! threads communicate with it exclusively through the command channel.

use std::time::Instant;

use crossbeam::channel::Receiver;

use super::reader::ReaderRdy;
use super::transport::FlowCommand;

/// Run the flow-control loop until every command sender is dropped.
///
/// The loop sleeps until the earliest pending timer deadline or the next
/// command, whichever comes first. Dropping all senders is the shutdown
/// signal.
pub fn run_flow_loop(mut reader: ReaderRdy, commands: Receiver<FlowCommand>) {
    loop {
        let tick = match reader.next_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                crossbeam::channel::after(wait)
            }
            None => crossbeam::channel::never(),
        };

        crossbeam::select! {
            recv(commands) -> msg => {
                match msg {
                    Ok(FlowCommand::Register(transport)) => {
                        reader.add_connection(transport);
                    }
                    Ok(FlowCommand::Event { conn, event }) => {
                        reader.handle_event(&conn, event, Instant::now());
                    }
                    Err(_) => {
                        tracing::debug!("command channel closed, stopping flow loop");
                        break;
                    }
                }
            }
            recv(tick) -> _ => {
                reader.poll_timers(Instant::now());
            }
        }
    }
}
