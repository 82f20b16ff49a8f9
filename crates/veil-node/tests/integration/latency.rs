//! Latency probe round trips across daemons.

use bytes::Bytes;
use veil_path::Direction;
use veil_protocol::{DecodeError, Message, MessageKind, Outcome, PathLatencyMessage};

use crate::harness::{test_hop_count, TestPathBuilder};

/// Probe at 1000ms, reply back at 1045ms: latency 45.
#[test]
fn test_probe_reply_latency_45ms() {
    let path = TestPathBuilder::new(2).start_ms(1000).build();
    path.establish();

    let nonce = 0x1122_3344_5566_7788;
    path.origin().ctx.send_latency_probe_with_nonce(nonce).unwrap();

    // Probe reaches the terminus, which reflects it
    let out = path.pump_one(20).unwrap().unwrap();
    assert_eq!(out, Outcome::Accepted(MessageKind::PathLatency));
    let reflected = path.fabric.pop().unwrap();
    assert_eq!(reflected.heading, Direction::Downstream);
    assert_eq!(
        Message::decode(&reflected.frame, veil_protocol::Registry::global()).unwrap(),
        Message::from(PathLatencyMessage::probe(nonce))
    );

    path.clock.set(1045);
    let origin = path.origin();
    let out = origin
        .daemon
        .deliver(&origin.path_id, reflected.heading, &reflected.frame)
        .unwrap();
    assert!(out.is_accepted());
    assert_eq!(origin.ctx.latency_ms(), Some(45));
    assert!(!origin.ctx.is_pending(nonce));
}

/// Round trip over N hops equals twice the one-way delay.
#[test]
fn test_n_hop_round_trip() {
    let n = test_hop_count(5);
    let path = TestPathBuilder::new(n).build();
    path.establish();

    for _ in 0..3 {
        path.origin().ctx.send_latency_probe().unwrap();
        let outcomes = path.pump(7);
        assert_eq!(outcomes.len(), 2 * (n - 1));
        assert!(outcomes.iter().all(Outcome::is_accepted));
        assert_eq!(
            path.origin().ctx.latency_ms(),
            Some(2 * (n as u64 - 1) * 7)
        );
    }
    assert_eq!(path.origin().ctx.stats().replies_matched, 3);
    assert_eq!(path.origin().ctx.pending_probes(), 0);
}

/// A second reply for the same nonce changes nothing.
#[test]
fn test_duplicate_reply_is_noop() {
    let path = TestPathBuilder::new(3).build();
    path.establish();
    path.origin().ctx.send_latency_probe_with_nonce(42).unwrap();
    path.pump(10);
    assert_eq!(path.origin().ctx.latency_ms(), Some(40));

    path.clock.advance(500);
    let origin = path.origin();
    let replay = Message::from(PathLatencyMessage::probe(42)).encode().unwrap();
    let out = origin
        .daemon
        .deliver(&origin.path_id, Direction::Downstream, &replay)
        .unwrap();
    assert!(out.is_accepted());
    assert_eq!(origin.ctx.latency_ms(), Some(40));
    assert_eq!(origin.ctx.stats().replies_matched, 1);
}

/// A reply nobody asked for is accepted and ignored.
#[test]
fn test_unmatched_reply_is_inert() {
    let path = TestPathBuilder::new(2).build();
    path.establish();
    let origin = path.origin();
    let before = origin.ctx.stats();

    let stray = Message::from(PathLatencyMessage {
        nonce: 9,
        latency_ms: 12,
    })
    .encode()
    .unwrap();
    let out = origin
        .daemon
        .deliver(&origin.path_id, Direction::Downstream, &stray)
        .unwrap();
    assert!(out.is_accepted());
    assert_eq!(origin.ctx.latency_ms(), None);
    assert_eq!(origin.ctx.stats(), before);
    assert_eq!(path.fabric.in_flight(), 0);
}

/// A frame with an extra key is dropped at the relay; the probe is lost and
/// later expires.
#[test]
fn test_tampered_probe_dropped_then_expires() {
    let path = TestPathBuilder::new(3).probe_timeout_ms(200).build();
    path.establish();
    path.origin().ctx.send_latency_probe_with_nonce(5).unwrap();

    let mut envelope = path.fabric.pop().unwrap();
    // Splice an unknown key in before the closing 'e'
    let mut bytes = envelope.frame.to_vec();
    bytes.pop();
    bytes.extend_from_slice(b"1:Zi0ee");
    envelope.frame = Bytes::from(bytes);

    let relay = &path.hops[1];
    let out = relay
        .daemon
        .deliver(&relay.path_id, envelope.heading, &envelope.frame)
        .unwrap();
    assert!(matches!(
        out,
        Outcome::Dropped(DecodeError::UnknownKey { .. })
    ));
    assert_eq!(path.fabric.in_flight(), 0);
    assert!(path.origin().ctx.is_pending(5));

    path.clock.advance(250);
    path.sweep_all();
    assert!(!path.origin().ctx.is_pending(5));
    assert_eq!(path.origin().ctx.stats().probes_expired, 1);
    assert_eq!(path.origin().ctx.latency_ms(), None);
}

/// Unknown discriminator: dropped, nothing forwarded.
#[test]
fn test_unknown_kind_dropped_at_relay() {
    let path = TestPathBuilder::new(3).build();
    let relay = &path.hops[1];
    let out = relay
        .daemon
        .deliver(&relay.path_id, Direction::Upstream, b"d1:A1:\xffe")
        .unwrap();
    assert_eq!(out, Outcome::Dropped(DecodeError::UnknownKind(0xFF)));
    assert_eq!(path.fabric.in_flight(), 0);
}
