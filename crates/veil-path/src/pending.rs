//! Pending latency probes for one path, keyed by nonce.

use std::collections::HashMap;

use veil_protocol::PathId;

use crate::PathError;

/// An outstanding probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingProbe {
    pub path_id: PathId,
    pub sent_at_ms: u64,
}

/// Nonce -> outstanding probe. At most one entry per live nonce.
#[derive(Debug)]
pub struct PendingProbes {
    entries: HashMap<u64, PendingProbe>,
    max: usize,
}

impl PendingProbes {
    pub fn new(max: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, nonce: u64) -> bool {
        self.entries.contains_key(&nonce)
    }

    pub fn insert(&mut self, nonce: u64, probe: PendingProbe) -> Result<(), PathError> {
        if self.entries.contains_key(&nonce) {
            return Err(PathError::NonceInUse(nonce));
        }
        if self.entries.len() >= self.max {
            return Err(PathError::TooManyPending { max: self.max });
        }
        self.entries.insert(nonce, probe);
        Ok(())
    }

    /// Remove and return the probe for `nonce`. A second call returns `None`.
    pub fn take(&mut self, nonce: u64) -> Option<PendingProbe> {
        self.entries.remove(&nonce)
    }

    /// Drop every probe older than `timeout_ms`, returning their nonces.
    pub fn expire(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<u64> {
        let mut expired = Vec::new();
        self.entries.retain(|nonce, probe| {
            let live = now_ms.saturating_sub(probe.sent_at_ms) < timeout_ms;
            if !live {
                expired.push(*nonce);
            }
            live
        });
        expired
    }

    /// Drop everything, returning how many probes were outstanding.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}
