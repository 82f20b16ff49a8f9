//! Path table -- thread-safe registry of the paths this node is a hop on.
//!
//! Maps PathId -> PathContext. The table lock only guards the map; message
//! handling runs under each path's own lock after the lookup is done.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use veil_protocol::{Outcome, PathId};

use crate::context::PathContext;
use crate::{Direction, PathError, PathRole};

/// Totals from one [`PathTable::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub probes_expired: usize,
    pub paths_removed: usize,
}

#[derive(Clone, Default)]
pub struct PathTable {
    inner: Arc<RwLock<HashMap<PathId, Arc<PathContext>>>>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path. Fails if a path with the same id is already present.
    pub fn insert(&self, ctx: Arc<PathContext>) -> Result<(), PathError> {
        let id = ctx.id();
        let role = ctx.role();
        let table_size = {
            let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if table.contains_key(&id) {
                return Err(PathError::Duplicate(id));
            }
            table.insert(id, ctx);
            table.len()
        };
        tracing::info!(path = %id, role = role.name(), table_size, "table: path added");
        Ok(())
    }

    pub fn get(&self, id: &PathId) -> Option<Arc<PathContext>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove a path and tear it down.
    pub fn remove(&self, id: &PathId) -> Option<Arc<PathContext>> {
        let removed = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(ctx) = &removed {
            let dropped = ctx.teardown();
            tracing::info!(path = %id, pending_dropped = dropped, "table: path removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered path.
    pub fn paths(&self) -> Vec<Arc<PathContext>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of the paths this node originated.
    pub fn origin_paths(&self) -> Vec<Arc<PathContext>> {
        self.paths()
            .into_iter()
            .filter(|ctx| ctx.role() == PathRole::Origin)
            .collect()
    }

    /// Hand an inbound frame to the path it arrived on.
    ///
    /// Returns `None` when the path is unknown; the frame is dropped.
    pub fn deliver(&self, id: &PathId, heading: Direction, frame: &[u8]) -> Option<Outcome> {
        let Some(ctx) = self.get(id) else {
            tracing::debug!(
                path = %id,
                heading = heading.as_str(),
                len = frame.len(),
                "table: frame for unknown path dropped"
            );
            return None;
        };
        Some(ctx.receive(heading, frame))
    }

    /// Sweep every path: expire lost probes, drop closed or expired paths.
    pub fn sweep(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let mut closed = Vec::new();
        for ctx in self.paths() {
            let report = ctx.sweep();
            summary.probes_expired += report.probes_expired;
            if report.closed {
                closed.push(ctx.id());
            }
        }

        if !closed.is_empty() {
            let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            for id in &closed {
                if table.remove(id).is_some() {
                    summary.paths_removed += 1;
                }
            }
        }
        if summary != SweepSummary::default() {
            tracing::debug!(
                probes_expired = summary.probes_expired,
                paths_removed = summary.paths_removed,
                "table: sweep"
            );
        }
        summary
    }

    /// Tear down and forget every path.
    pub fn teardown_all(&self) -> usize {
        let drained: Vec<_> = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, ctx)| ctx)
            .collect();
        for ctx in &drained {
            ctx.teardown();
        }
        if !drained.is_empty() {
            tracing::info!(paths = drained.len(), "table: all paths torn down");
        }
        drained.len()
    }
}
