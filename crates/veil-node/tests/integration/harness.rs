//! Test harness for in-process veil-node integration tests.
//!
//! Provides TestPath (one path spanning N daemons, one hop each) and
//! TestPathBuilder (config). Hops talk over an in-memory loopback fabric and
//! share a manual clock, so latencies are exact.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use veil_node::config::NodeConfig;
use veil_node::Daemon;
use veil_path::loopback::LoopbackFabric;
use veil_path::{ManualClock, PathContext, PathRole, PathStatus};
use veil_protocol::{Outcome, PathId};

/// Read TEST_HOP_COUNT from environment, falling back to `default`.
pub fn test_hop_count(default: usize) -> usize {
    std::env::var("TEST_HOP_COUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Poll `check` every 5ms until it holds, or fail after `timeout`.
pub async fn wait_until(
    what: &str,
    timeout: Duration,
    mut check: impl FnMut() -> bool,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timeout waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Write `contents` to config.toml inside `dir`.
pub fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

/// One node's daemon and its hop on the test path.
pub struct TestHop {
    pub daemon: Arc<Daemon>,
    pub path_id: PathId,
    pub ctx: Arc<PathContext>,
}

pub struct TestPath {
    pub clock: Arc<ManualClock>,
    pub fabric: Arc<LoopbackFabric>,
    pub hops: Vec<TestHop>,
    tasks: Vec<JoinHandle<()>>,
}

#[allow(dead_code)]
impl TestPath {
    pub fn origin(&self) -> &TestHop {
        &self.hops[0]
    }

    pub fn terminus(&self) -> &TestHop {
        &self.hops[self.hops.len() - 1]
    }

    /// Deliver one queued frame through the receiving hop's daemon.
    ///
    /// Returns `None` when nothing is queued; `Some(None)` when the
    /// receiving daemon no longer knows the path.
    pub fn pump_one(&self, delay_ms: u64) -> Option<Option<Outcome>> {
        let envelope = self.fabric.pop()?;
        self.clock.advance(delay_ms);
        let hop = &self.hops[envelope.to];
        Some(
            hop.daemon
                .deliver(&hop.path_id, envelope.heading, &envelope.frame),
        )
    }

    /// Deliver everything in flight, advancing the clock `delay_ms` per frame.
    pub fn pump(&self, delay_ms: u64) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.pump_one(delay_ms) {
            outcomes.extend(outcome);
        }
        outcomes
    }

    /// Terminus confirms, confirmation travels back to the origin.
    pub fn establish(&self) {
        let lifetime = self.terminus().daemon.config().path.lifetime_ms;
        self.terminus().ctx.confirm(lifetime).unwrap();
        let outcomes = self.pump(0);
        assert!(outcomes.iter().all(Outcome::is_accepted), "{outcomes:?}");
        assert_eq!(self.origin().ctx.status(), PathStatus::Established);
    }

    /// Sweep every daemon, returning the number of paths removed.
    pub fn sweep_all(&self) -> usize {
        self.hops
            .iter()
            .map(|hop| hop.daemon.sweep().paths_removed)
            .sum()
    }

    pub fn all_closed(&self) -> bool {
        self.hops.iter().all(|hop| hop.ctx.is_closed())
    }

    pub fn all_forgotten(&self) -> bool {
        self.hops
            .iter()
            .all(|hop| hop.daemon.path(&hop.path_id).is_none())
    }

    /// Start every daemon's timer loop in the background.
    pub fn start_all(&mut self) {
        let runtime = tokio::runtime::Handle::current();
        for hop in &self.hops {
            self.tasks.push(hop.daemon.spawn(&runtime).unwrap());
        }
    }

    /// Stop every daemon and wait for its loop to exit.
    pub async fn shutdown_all(self) {
        for hop in &self.hops {
            hop.daemon.stop();
        }
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .unwrap()
                .unwrap();
        }
    }
}

pub struct TestPathBuilder {
    hops: usize,
    config: NodeConfig,
    start_ms: u64,
}

#[allow(dead_code)]
impl TestPathBuilder {
    pub fn new(hops: usize) -> Self {
        Self {
            hops,
            config: NodeConfig::default(),
            start_ms: 0,
        }
    }

    pub fn start_ms(mut self, ms: u64) -> Self {
        self.start_ms = ms;
        self
    }

    pub fn probe_timeout_ms(mut self, ms: u64) -> Self {
        self.config.path.probe_timeout_ms = ms;
        self
    }

    pub fn lifetime_ms(mut self, ms: u64) -> Self {
        self.config.path.lifetime_ms = ms;
        self
    }

    pub fn teardown_on_reject(mut self, on: bool) -> Self {
        self.config.path.teardown_on_reject = on;
        self
    }

    /// Sweep and probe every 10ms.
    pub fn fast_timers(mut self) -> Self {
        self.config.path.sweep_interval_ms = 10;
        self.config.path.probe_interval_ms = 10;
        self
    }

    pub fn build(self) -> TestPath {
        let hops = self.hops.max(2);
        let clock = Arc::new(ManualClock::new(self.start_ms));
        let fabric = LoopbackFabric::new(hops);
        let hops = (0..hops)
            .map(|i| {
                let role = if i == 0 {
                    PathRole::Origin
                } else if i == hops - 1 {
                    PathRole::Terminus
                } else {
                    PathRole::Relay
                };
                let daemon = Arc::new(
                    Daemon::new(self.config.clone())
                        .unwrap()
                        .with_clock(clock.clone()),
                );
                let path_id = PathId([i as u8 + 1; 16]);
                let ctx = daemon.open_path(path_id, role, fabric.link(i)).unwrap();
                TestHop {
                    daemon,
                    path_id,
                    ctx,
                }
            })
            .collect();
        TestPath {
            clock,
            fabric,
            hops,
            tasks: Vec::new(),
        }
    }
}
