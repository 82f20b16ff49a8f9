//! Running daemons: timer-driven probes and sweeps, shutdown teardown.

use std::time::Duration;

use veil_node::config::NodeConfig;
use veil_node::Daemon;

use crate::harness::{wait_until, write_config, TestPathBuilder};

/// Daemon timers probe the path; a pump task plays the network.
#[tokio::test]
async fn test_timers_measure_latency() {
    let mut path = TestPathBuilder::new(3).fast_timers().build();
    path.establish();
    path.start_all();

    let origin = path.origin().ctx.clone();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while origin.latency_ms().is_none() {
        assert!(tokio::time::Instant::now() < deadline, "no probe resolved");
        path.pump(3);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Four link traversals at 3ms each, more if probes overlapped
    let latency = origin.latency_ms().unwrap();
    assert!(latency >= 12 && latency % 3 == 0, "latency {latency}");
    assert!(origin.stats().probes_sent >= 1);

    let hops: Vec<_> = path.hops.iter().map(|hop| hop.ctx.clone()).collect();
    path.shutdown_all().await;
    assert!(hops.iter().all(|ctx| ctx.is_closed()));
}

/// A running daemon's sweep expires the path by itself.
#[tokio::test]
async fn test_sweep_timer_expires_path() {
    let mut path = TestPathBuilder::new(2).fast_timers().lifetime_ms(100).build();
    path.establish();
    path.start_all();

    path.clock.advance(100);
    let hops = &path.hops;
    wait_until("path expiry", Duration::from_secs(10), || {
        hops.iter().all(|hop| hop.daemon.path(&hop.path_id).is_none())
    })
    .await
    .unwrap();
    assert!(path.all_closed());
    path.shutdown_all().await;
}

/// Foreground run returns once stopped from elsewhere.
#[tokio::test]
async fn test_run_until_stopped() {
    let mut cfg = NodeConfig::default();
    cfg.path.sweep_interval_ms = 10;
    let daemon = std::sync::Arc::new(Daemon::new(cfg).unwrap());

    let stopper = daemon.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        stopper.stop();
    });
    tokio::time::timeout(Duration::from_secs(5), daemon.run())
        .await
        .unwrap()
        .unwrap();
    assert!(!daemon.is_running());
}

/// Config file values reach paths opened by the daemon.
#[test]
fn test_config_file_drives_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[node]
name = "relay-test"

[path]
probe_timeout_ms = 1234
max_pending_probes = 2
"#,
    );
    let cfg = NodeConfig::load_or_default(&path).unwrap();
    let daemon = Daemon::new(cfg).unwrap();
    assert_eq!(daemon.config().node.name, "relay-test");

    let ctx = daemon
        .open_path(
            veil_protocol::PathId([1; 16]),
            veil_path::PathRole::Origin,
            veil_path::loopback::LoopbackFabric::new(2).link(0),
        )
        .unwrap();
    ctx.send_latency_probe().unwrap();
    ctx.send_latency_probe().unwrap();
    assert!(matches!(
        ctx.send_latency_probe(),
        Err(veil_path::PathError::TooManyPending { max: 2 })
    ));
}
