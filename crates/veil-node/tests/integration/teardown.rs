//! Path teardown: explicit close, lifetime expiry, rejection escalation.

use veil_path::{Direction, PathError, PathStatus};
use veil_protocol::{
    Message, MessageKind, Outcome, PathConfirmMessage, Rejection, CLOSE_REASON_NORMAL,
};

use crate::harness::TestPathBuilder;

/// Three probes outstanding at teardown: all invalid, late replies inert.
#[test]
fn test_teardown_with_pending_probes() {
    let path = TestPathBuilder::new(3).build();
    path.establish();
    for nonce in [1, 2, 3] {
        path.origin().ctx.send_latency_probe_with_nonce(nonce).unwrap();
    }
    assert_eq!(path.origin().ctx.pending_probes(), 3);

    assert_eq!(path.origin().ctx.teardown(), 3);
    for nonce in [1, 2, 3] {
        assert!(!path.origin().ctx.is_pending(nonce));
    }

    // The reflected probes still come back; nothing moves
    let outcomes = path.pump(10);
    assert!(outcomes.iter().all(Outcome::is_accepted));
    assert_eq!(path.origin().ctx.latency_ms(), None);
    assert_eq!(path.origin().ctx.stats().replies_matched, 0);
    assert!(matches!(
        path.origin().ctx.send_latency_probe(),
        Err(PathError::Closed(_))
    ));
}

#[test]
fn test_origin_close_propagates() {
    let path = TestPathBuilder::new(4).build();
    path.establish();
    let origin = path.origin();
    origin
        .daemon
        .close_path(&origin.path_id, CLOSE_REASON_NORMAL)
        .unwrap();
    assert!(origin.daemon.path(&origin.path_id).is_none());

    path.pump(5);
    assert!(path.all_closed());
    assert_eq!(path.sweep_all(), 3);
    assert!(path.all_forgotten());
}

#[test]
fn test_relay_close_reaches_both_ends() {
    let path = TestPathBuilder::new(5).build();
    path.establish();
    path.hops[2].ctx.close(CLOSE_REASON_NORMAL).unwrap();
    path.pump(1);
    assert!(path.all_closed());
}

#[test]
fn test_lifetime_expiry_closes_every_hop() {
    let path = TestPathBuilder::new(3).lifetime_ms(1000).build();
    path.establish();
    path.origin().ctx.send_latency_probe_with_nonce(8).unwrap();

    path.clock.advance(999);
    assert_eq!(path.sweep_all(), 0);

    path.clock.advance(1);
    assert_eq!(path.sweep_all(), 3);
    assert!(path.all_closed());
    assert!(path.all_forgotten());
    assert_eq!(path.origin().ctx.pending_probes(), 0);

    // Close notifications and the probe arrive at paths nobody knows
    path.pump(1);
    assert_eq!(path.fabric.in_flight(), 0);
}

#[test]
fn test_rejection_keeps_path_by_default() {
    let path = TestPathBuilder::new(3).build();
    path.establish();
    let terminus = path.terminus();
    let confirm = Message::from(PathConfirmMessage::default()).encode().unwrap();
    let out = terminus
        .daemon
        .deliver(&terminus.path_id, Direction::Upstream, &confirm)
        .unwrap();
    assert_eq!(
        out,
        Outcome::Rejected {
            kind: MessageKind::PathConfirm,
            reason: Rejection::OutOfRole {
                kind: MessageKind::PathConfirm,
                role: "terminus",
            },
        }
    );
    assert_eq!(terminus.ctx.status(), PathStatus::Established);
    assert_eq!(terminus.ctx.stats().rejections, 1);
    assert_eq!(path.fabric.in_flight(), 0);
}

#[test]
fn test_rejection_tears_down_when_configured() {
    let path = TestPathBuilder::new(3).teardown_on_reject(true).build();
    path.establish();
    let terminus = path.terminus();
    let confirm = Message::from(PathConfirmMessage::default()).encode().unwrap();
    let out = terminus
        .daemon
        .deliver(&terminus.path_id, Direction::Upstream, &confirm)
        .unwrap();
    assert!(matches!(out, Outcome::Rejected { .. }));
    assert!(terminus.ctx.is_closed());

    path.pump(1);
    assert!(path.all_closed());
}
