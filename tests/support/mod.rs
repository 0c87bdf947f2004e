//! Shared test transport that records every RDY value put on the wire.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rdyflow::{ConnectionId, RdyTransport};

#[derive(Clone)]
pub struct SentLog(Arc<Mutex<Vec<u64>>>);

impl SentLog {
    pub fn all(&self) -> Vec<u64> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<u64> {
        self.0.lock().unwrap().last().copied()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

pub struct RecordingTransport {
    id: ConnectionId,
    max_rdy: u64,
    sent: Arc<Mutex<Vec<u64>>>,
}

impl RecordingTransport {
    pub fn new(name: &str, max_rdy: u64) -> (Self, SentLog) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            id: ConnectionId::new(name),
            max_rdy,
            sent: Arc::clone(&sent),
        };
        (transport, SentLog(sent))
    }
}

impl RdyTransport for RecordingTransport {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn max_rdy_count(&self) -> u64 {
        self.max_rdy
    }

    fn send_rdy(&self, count: u64) {
        self.sent.lock().unwrap().push(count);
    }
}
