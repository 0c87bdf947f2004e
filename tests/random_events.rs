//! Randomized event storms against the coordinator invariants.
//!
//! A tiny broker model delivers messages only to connections with unused
//! credit; the storm interleaves deliveries, settlements, failures, timer
//! firings, and membership churn, checking the flow-control invariants at
//! every quiescent point.

mod support;

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rdyflow::{ConnEvent, ConnectionId, ReaderConfig, ReaderRdy, ReaderState};
use support::RecordingTransport;

fn admit(reader: &mut ReaderRdy, name: &str, max_rdy: u64, now: Instant) -> ConnectionId {
    let (transport, _log) = RecordingTransport::new(name, max_rdy);
    let id = ConnectionId::new(name);
    reader.add_connection(Box::new(transport));
    reader.handle_event(&id, ConnEvent::Subscribed, now);
    id
}

fn check_invariants(reader: &ReaderRdy, ids: &[ConnectionId], max_in_flight: u64) {
    let mut cap_sum = 0;
    let mut sent_sum = 0;
    let mut live = 0;
    for id in ids {
        let Some(conn) = reader.connection(id) else {
            continue;
        };
        live += 1;
        assert!(
            conn.last_rdy_sent() <= conn.max_conn_rdy(),
            "{id}: sent {} above cap {}",
            conn.last_rdy_sent(),
            conn.max_conn_rdy()
        );
        assert!(
            conn.max_conn_rdy() <= conn.max_rdy_count(),
            "{id}: cap above broker ceiling"
        );
        if reader.state() == ReaderState::Backoff {
            assert_eq!(conn.last_rdy_sent(), 0, "{id}: credit held during backoff");
        }
        if reader.is_low_rdy() {
            assert_eq!(conn.max_conn_rdy(), 1, "{id}: low-RDY cap must be 1");
        }
        cap_sum += conn.max_conn_rdy();
        sent_sum += conn.last_rdy_sent();
    }

    if reader.state() == ReaderState::Max && !reader.is_low_rdy() && live > 0 {
        assert_eq!(cap_sum, max_in_flight, "caps must cover the whole budget");
    }
    if reader.is_low_rdy() {
        assert!(
            sent_sum <= max_in_flight,
            "low-RDY grants exceed the budget"
        );
    }
}

/// One storm step: deliver, settle, requeue, fail, or advance time.
fn storm_step(
    reader: &mut ReaderRdy,
    ids: &[ConnectionId],
    rng: &mut StdRng,
    now: &mut Instant,
) {
    match rng.gen_range(0..10) {
        // Deliver a message where the broker still has credit to spend.
        0..=3 => {
            let deliverable: Vec<&ConnectionId> = ids
                .iter()
                .filter(|id| {
                    reader
                        .connection(id)
                        .is_some_and(|c| c.in_flight() < c.last_rdy_sent())
                })
                .collect();
            if let Some(id) = pick(&deliverable, rng) {
                reader.handle_event(&id.clone(), ConnEvent::Message, *now);
            }
        }
        // Finish an in-flight message.
        4..=6 => {
            if let Some(id) = pick(&busy(reader, ids), rng) {
                reader.handle_event(&id.clone(), ConnEvent::Finished, *now);
            }
        }
        // Requeue an in-flight message.
        7 => {
            if let Some(id) = pick(&busy(reader, ids), rng) {
                reader.handle_event(&id.clone(), ConnEvent::Requeued, *now);
            }
        }
        // A failed message trips the global throttle.
        8 => {
            if let Some(id) = pick(&ids.iter().collect::<Vec<_>>(), rng) {
                reader.handle_event(&id.clone(), ConnEvent::Backoff, *now);
            }
        }
        // Let time pass; fire whatever is due.
        _ => {
            *now += Duration::from_millis(rng.gen_range(100..2_000));
            reader.poll_timers(*now);
        }
    }
}

fn busy(reader: &ReaderRdy, ids: &[ConnectionId]) -> Vec<ConnectionId> {
    ids.iter()
        .filter(|id| reader.connection(id).is_some_and(|c| c.in_flight() > 0))
        .cloned()
        .collect()
}

fn pick<T: Clone>(items: &[T], rng: &mut StdRng) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[rng.gen_range(0..items.len())].clone())
    }
}

#[test]
fn storm_with_ample_budget_keeps_invariants() {
    let max_in_flight = 12;
    let mut reader = ReaderRdy::new(ReaderConfig::with_max_in_flight(max_in_flight)).unwrap();
    let mut now = Instant::now();
    let mut rng = StdRng::seed_from_u64(0x5eed_0001);

    let ids: Vec<ConnectionId> = (0..4)
        .map(|i| admit(&mut reader, &format!("node{i}:4150"), 100, now))
        .collect();

    for _ in 0..2_000 {
        storm_step(&mut reader, &ids, &mut rng, &mut now);
        check_invariants(&reader, &ids, max_in_flight);
    }
}

#[test]
fn storm_in_low_rdy_regime_keeps_invariants() {
    let max_in_flight = 2;
    let mut reader = ReaderRdy::new(ReaderConfig::with_max_in_flight(max_in_flight)).unwrap();
    let mut now = Instant::now();
    let mut rng = StdRng::seed_from_u64(0x5eed_0002);

    let ids: Vec<ConnectionId> = (0..5)
        .map(|i| admit(&mut reader, &format!("node{i}:4150"), 100, now))
        .collect();
    assert!(reader.is_low_rdy());

    for _ in 0..2_000 {
        storm_step(&mut reader, &ids, &mut rng, &mut now);
        check_invariants(&reader, &ids, max_in_flight);
    }
}

#[test]
fn storm_with_membership_churn_keeps_invariants() {
    let max_in_flight = 3;
    let mut reader = ReaderRdy::new(ReaderConfig::with_max_in_flight(max_in_flight)).unwrap();
    let mut now = Instant::now();
    let mut rng = StdRng::seed_from_u64(0x5eed_0003);

    let mut next_name = 0u32;
    let mut ids: Vec<ConnectionId> = Vec::new();
    for _ in 0..4 {
        ids.push(admit(&mut reader, &format!("node{next_name}:4150"), 50, now));
        next_name += 1;
    }

    for step in 0..2_000 {
        if step % 50 == 25 && !ids.is_empty() {
            // Close a random connection, credit and in-flight included.
            let victim = ids.remove(rng.gen_range(0..ids.len()));
            reader.handle_event(&victim, ConnEvent::Closed, now);
        }
        if step % 50 == 40 && ids.len() < 6 {
            ids.push(admit(&mut reader, &format!("node{next_name}:4150"), 50, now));
            next_name += 1;
        }
        storm_step(&mut reader, &ids, &mut rng, &mut now);
        check_invariants(&reader, &ids, max_in_flight);
    }

    // Drain: close everything and the reader must return to a clean zero.
    for id in ids.drain(..) {
        reader.handle_event(&id, ConnEvent::Closed, now);
    }
    assert_eq!(reader.state(), ReaderState::Zero);
    assert_eq!(reader.connection_count(), 0);
    assert_eq!(reader.in_flight(), 0);
    assert!(reader.next_deadline().is_none());
}

#[test]
fn backoff_always_recovers() {
    let max_in_flight = 4;
    let mut reader = ReaderRdy::new(ReaderConfig::with_max_in_flight(max_in_flight)).unwrap();
    let mut now = Instant::now();
    let mut rng = StdRng::seed_from_u64(0x5eed_0004);

    let ids: Vec<ConnectionId> = (0..2)
        .map(|i| admit(&mut reader, &format!("node{i}:4150"), 100, now))
        .collect();

    for round in 0..20 {
        let victim = &ids[rng.gen_range(0..ids.len())];
        reader.handle_event(victim, ConnEvent::Backoff, now);
        assert_eq!(reader.state(), ReaderState::Backoff);
        check_invariants(&reader, &ids, max_in_flight);

        // Wait out the interval, then let the probe succeed.
        let deadline = reader.next_deadline().expect("backoff timer armed");
        now = deadline;
        reader.poll_timers(now);
        assert_eq!(reader.state(), ReaderState::TryOne);

        let probed = ids
            .iter()
            .find(|id| reader.connection(id).unwrap().last_rdy_sent() > 0)
            .cloned()
            .expect("probe granted one credit");
        reader.handle_event(&probed, ConnEvent::Message, now);
        reader.handle_event(&probed, ConnEvent::Finished, now);
        assert_eq!(reader.state(), ReaderState::Max, "round {round}");
        check_invariants(&reader, &ids, max_in_flight);
    }
}
