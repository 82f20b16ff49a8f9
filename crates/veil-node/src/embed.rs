//! Host embedding -- drive daemons through opaque handles.
//!
//! An embedding host (a mobile shell, a test driver) never holds a daemon
//! directly. It obtains a [`Handle`], and every later call resolves that
//! handle; unknown, freed and zero handles are all refused the same way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::daemon::{Daemon, DaemonError};
use crate::handle::{Handle, HandleTable};
use crate::logging;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),
    #[error("log setup failed: {0}")]
    Logging(String),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

pub struct Host {
    runtime: tokio::runtime::Handle,
    daemons: HandleTable<Daemon>,
    tasks: Mutex<HashMap<Handle, JoinHandle<()>>>,
}

impl Host {
    /// Daemons obtained from this host run on `runtime`.
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self {
            runtime,
            daemons: HandleTable::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<Handle, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a handle to its daemon.
    pub fn daemon(&self, handle: Handle) -> Result<Arc<Daemon>, HostError> {
        self.daemons
            .get(handle)
            .ok_or(HostError::InvalidHandle(handle))
    }

    /// Create a stopped daemon with its own log dispatcher.
    pub fn obtain(&self, config: NodeConfig) -> Result<Handle, HostError> {
        let dispatch =
            logging::dispatch(&config.log).map_err(|e| HostError::Logging(e.to_string()))?;
        let daemon = Daemon::new(config)?.with_dispatch(dispatch);
        let handle = self.daemons.insert(daemon);
        tracing::debug!(%handle, "host: daemon obtained");
        Ok(handle)
    }

    /// Reconfigure a stopped daemon, rebuilding its log dispatcher.
    pub fn configure(&self, handle: Handle, config: NodeConfig) -> Result<(), HostError> {
        let daemon = self.daemon(handle)?;
        let dispatch =
            logging::dispatch(&config.log).map_err(|e| HostError::Logging(e.to_string()))?;
        daemon.configure(config)?;
        daemon.set_dispatch(dispatch);
        Ok(())
    }

    /// Start the daemon in the background.
    pub fn run(&self, handle: Handle) -> Result<(), HostError> {
        let daemon = self.daemon(handle)?;
        let task = daemon.spawn(&self.runtime)?;
        // Replacing an unjoined task detaches it
        self.tasks().insert(handle, task);
        Ok(())
    }

    pub fn is_running(&self, handle: Handle) -> Result<bool, HostError> {
        Ok(self.daemon(handle)?.is_running())
    }

    /// Ask the daemon to stop. Returns false if it was not running.
    pub fn stop(&self, handle: Handle) -> Result<bool, HostError> {
        Ok(self.daemon(handle)?.stop())
    }

    /// Wait for a stopped daemon's task to finish.
    pub async fn join(&self, handle: Handle) -> Result<(), HostError> {
        self.daemon(handle)?;
        let task = self.tasks().remove(&handle);
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(%handle, "host: daemon task failed: {e}");
            }
        }
        Ok(())
    }

    /// Stop the daemon if needed and release the handle.
    pub fn free(&self, handle: Handle) -> Result<(), HostError> {
        let daemon = self
            .daemons
            .remove(handle)
            .ok_or(HostError::InvalidHandle(handle))?;
        daemon.stop();
        // Detach; a running task still finishes on its own
        self.tasks().remove(&handle);
        daemon.table().teardown_all();
        tracing::debug!(%handle, "host: daemon freed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.daemons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.daemons.is_empty()
    }
}
