//! Host embedding through opaque handles.

use std::time::Duration;

use veil_node::config::NodeConfig;
use veil_node::{Handle, Host, HostError};
use veil_path::loopback::LoopbackFabric;
use veil_path::PathRole;
use veil_protocol::PathId;

use crate::harness::{wait_until, write_config};

fn fast_config() -> NodeConfig {
    let mut cfg = NodeConfig::default();
    cfg.path.sweep_interval_ms = 10;
    cfg.path.probe_interval_ms = 10;
    cfg
}

/// Two daemons behind one host run and stop independently.
#[tokio::test]
async fn test_two_daemons_one_host() {
    let host = Host::new(tokio::runtime::Handle::current());
    let a = host.obtain(fast_config()).unwrap();
    let b = host.obtain(fast_config()).unwrap();
    assert_ne!(a, b);

    host.run(a).unwrap();
    host.run(b).unwrap();
    assert!(host.is_running(a).unwrap() && host.is_running(b).unwrap());

    host.stop(a).unwrap();
    host.join(a).await.unwrap();
    assert!(!host.is_running(a).unwrap());
    assert!(host.is_running(b).unwrap());

    host.free(a).unwrap();
    host.free(b).unwrap();
    assert!(host.is_empty());
}

/// Stopping a daemon through its handle tears its paths down.
#[tokio::test]
async fn test_stop_tears_down_daemon_paths() {
    let host = Host::new(tokio::runtime::Handle::current());
    let h = host.obtain(fast_config()).unwrap();
    let daemon = host.daemon(h).unwrap();
    let fabric = LoopbackFabric::new(3);
    let ctx = daemon
        .open_path(PathId([7; 16]), PathRole::Relay, fabric.link(1))
        .unwrap();

    host.run(h).unwrap();
    host.stop(h).unwrap();
    host.join(h).await.unwrap();
    assert!(ctx.is_closed());
    assert!(daemon.table().is_empty());
}

/// Freeing a running daemon stops it.
#[tokio::test]
async fn test_free_running_daemon() {
    let host = Host::new(tokio::runtime::Handle::current());
    let h = host.obtain(fast_config()).unwrap();
    let daemon = host.daemon(h).unwrap();
    host.run(h).unwrap();

    host.free(h).unwrap();
    assert!(matches!(host.is_running(h), Err(HostError::InvalidHandle(_))));
    wait_until("daemon stop", Duration::from_secs(5), || !daemon.is_running())
        .await
        .unwrap();
}

/// Config read from disk is what the daemon runs with.
#[tokio::test]
async fn test_obtain_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[node]\nname = \"embedded\"\n\n[log]\njson = true\n");
    let cfg = NodeConfig::load_or_default(&path).unwrap();

    let host = Host::new(tokio::runtime::Handle::current());
    let h = host.obtain(cfg).unwrap();
    assert_eq!(host.daemon(h).unwrap().config().node.name, "embedded");
    assert!(host.daemon(Handle::from_raw(h.into_raw() + 1)).is_err());
}
