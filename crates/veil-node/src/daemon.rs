//! Daemon -- owns a node's paths and drives their timers.
//!
//! While running, a single task ticks two intervals:
//!   1. sweep: expire lost probes, drop closed or expired paths
//!   2. probe: send a latency probe on every established origin path
//!
//! Stopping cancels the task; on the way out every path is torn down.
//! All logging goes through the daemon's own dispatcher, inside a `node`
//! span naming the daemon.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, Span};
use veil_path::{
    Clock, Direction, HopLink, PathContext, PathError, PathRole, PathStatus, PathTable,
    SweepSummary, SystemClock,
};
use veil_protocol::{Outcome, PathId};

use crate::config::NodeConfig;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon is already running")]
    AlreadyRunning,
    #[error("daemon is running, stop it first")]
    Running,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unknown path {0}")]
    UnknownPath(PathId),
    #[error(transparent)]
    Path(#[from] PathError),
}

pub struct Daemon {
    config: RwLock<NodeConfig>,
    dispatch: RwLock<Dispatch>,
    clock: Arc<dyn Clock>,
    table: PathTable,
    /// Set while running. A cancelled token means a stop is in progress.
    running: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("paths", &self.table.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Daemon {
    /// Create a stopped daemon that logs through the current default dispatcher.
    pub fn new(config: NodeConfig) -> Result<Self, DaemonError> {
        config
            .validate()
            .map_err(|e| DaemonError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            config: RwLock::new(config),
            dispatch: RwLock::new(tracing::dispatcher::get_default(Dispatch::clone)),
            clock: Arc::new(SystemClock::new()),
            table: PathTable::new(),
            running: Mutex::new(None),
        })
    }

    pub fn with_dispatch(self, dispatch: Dispatch) -> Self {
        self.set_dispatch(dispatch);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> NodeConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the config. Refused while running; existing paths keep the
    /// settings they were opened with.
    pub fn configure(&self, config: NodeConfig) -> Result<(), DaemonError> {
        if self.is_running() {
            return Err(DaemonError::Running);
        }
        config
            .validate()
            .map_err(|e| DaemonError::InvalidConfig(e.to_string()))?;
        self.in_scope(|| tracing::info!(node = %config.node.name, "daemon: reconfigured"));
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_dispatch(&self, dispatch: Dispatch) {
        *self.dispatch.write().unwrap_or_else(PoisonError::into_inner) = dispatch;
    }

    /// Create under the daemon's dispatcher.
    fn span(&self) -> Span {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        tracing::info_span!("node", name = %config.node.name)
    }

    fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let dispatch = self.dispatch();
        tracing::dispatcher::with_default(&dispatch, || self.span().in_scope(f))
    }

    pub fn table(&self) -> &PathTable {
        &self.table
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Register this node as a hop on path `id`.
    pub fn open_path(
        &self,
        id: PathId,
        role: PathRole,
        link: Arc<dyn HopLink>,
    ) -> Result<Arc<PathContext>, DaemonError> {
        let path_config = self.config().path.to_path_config();
        self.in_scope(|| -> Result<_, DaemonError> {
            let ctx = Arc::new(PathContext::new(
                id,
                role,
                path_config,
                link,
                self.clock.clone(),
            ));
            self.table.insert(ctx.clone())?;
            Ok(ctx)
        })
    }

    pub fn path(&self, id: &PathId) -> Option<Arc<PathContext>> {
        self.table.get(id)
    }

    /// Hand an inbound control frame to its path. `None` if the path is unknown.
    pub fn deliver(&self, id: &PathId, heading: Direction, frame: &[u8]) -> Option<Outcome> {
        self.in_scope(|| self.table.deliver(id, heading, frame))
    }

    /// Notify neighbours, tear the path down and forget it.
    ///
    /// The path is removed even if a neighbour could not be notified; that
    /// link error is still returned.
    pub fn close_path(&self, id: &PathId, reason: u64) -> Result<(), DaemonError> {
        self.in_scope(|| -> Result<(), DaemonError> {
            let ctx = self.table.get(id).ok_or(DaemonError::UnknownPath(*id))?;
            let result = ctx.close(reason);
            self.table.remove(id);
            match result {
                Ok(()) | Err(PathError::Closed(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Send one latency probe on every established origin path.
    pub fn probe_all(&self) -> usize {
        self.in_scope(|| self.probe_paths())
    }

    fn probe_paths(&self) -> usize {
        let mut sent = 0;
        for ctx in self.table.origin_paths() {
            if ctx.status() != PathStatus::Established {
                continue;
            }
            match ctx.send_latency_probe() {
                Ok(_) => sent += 1,
                Err(PathError::TooManyPending { max }) => {
                    tracing::debug!(path = %ctx.id(), max, "daemon: probe skipped, too many pending");
                }
                Err(e) => tracing::warn!(path = %ctx.id(), "daemon: probe failed: {e}"),
            }
        }
        sent
    }

    pub fn sweep(&self) -> SweepSummary {
        self.in_scope(|| self.table.sweep())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn running(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn claim(&self) -> Result<CancellationToken, DaemonError> {
        let mut running = self.running();
        if running.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return Err(DaemonError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());
        Ok(token)
    }

    /// Run in the current task until [`Daemon::stop`] is called.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let token = self.claim()?;
        self.serve(token).await;
        Ok(())
    }

    /// Run on `runtime` in the background. The daemon counts as running as
    /// soon as this returns.
    pub fn spawn(
        self: &Arc<Self>,
        runtime: &tokio::runtime::Handle,
    ) -> Result<JoinHandle<()>, DaemonError> {
        let token = self.claim()?;
        let daemon = self.clone();
        Ok(runtime.spawn(async move { daemon.serve(token).await }))
    }

    /// Ask a running daemon to stop. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let stopped = match self.running().as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        };
        if stopped {
            self.in_scope(|| tracing::info!("daemon: stop requested"));
        }
        stopped
    }

    async fn serve(&self, token: CancellationToken) {
        let dispatch = self.dispatch();
        let span = tracing::dispatcher::with_default(&dispatch, || self.span());
        self.serve_loop(token)
            .instrument(span)
            .with_subscriber(dispatch)
            .await
    }

    async fn serve_loop(&self, token: CancellationToken) {
        let config = self.config();
        let mut sweep = tokio::time::interval(config.path.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probe = tokio::time::interval(config.path.probe_interval());
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            node = %config.node.name,
            sweep_interval_ms = config.path.sweep_interval_ms,
            probe_interval_ms = config.path.probe_interval_ms,
            "daemon: started"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = sweep.tick() => {
                    self.table.sweep();
                }
                _ = probe.tick() => {
                    let sent = self.probe_paths();
                    if sent > 0 {
                        tracing::debug!(sent, "daemon: latency probes sent");
                    }
                }
            }
        }

        let torn_down = self.table.teardown_all();
        {
            let mut running = self.running();
            if running.as_ref().is_some_and(CancellationToken::is_cancelled) {
                *running = None;
            }
        }
        tracing::info!(node = %config.node.name, paths = torn_down, "daemon: stopped");
    }
}
