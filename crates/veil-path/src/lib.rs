//! Veil Path -- per-path control state.
//!
//! A [`PathContext`] is one hop's view of one path: its role, its pending
//! latency probes, its lifecycle, and the link it forwards control messages
//! on. It implements the protocol's handler interface. [`PathTable`] holds
//! every path a node participates in; each path has its own lock, so two
//! paths never contend.

pub mod clock;
pub mod context;
pub mod loopback;
pub mod pending;
pub mod table;

use bytes::Bytes;
use veil_protocol::{EncodeError, PathId, PROTOCOL_PARAMS};

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{PathContext, PathStats, PathStatus, SweepReport};
pub use pending::{PendingProbe, PendingProbes};
pub use table::{PathTable, SweepSummary};

/// Direction a message travels along a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Away from the origin, toward the terminus.
    Upstream,
    /// Toward the origin.
    Downstream,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Upstream => Direction::Downstream,
            Direction::Downstream => Direction::Upstream,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

/// Where this hop sits on the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathRole {
    /// Built the path; issues probes and resolves replies.
    Origin,
    /// Intermediate hop; forwards control messages unchanged.
    Relay,
    /// Last hop; reflects probes and performs transfers.
    Terminus,
}

impl PathRole {
    pub fn name(&self) -> &'static str {
        match self {
            PathRole::Origin => "origin",
            PathRole::Relay => "relay",
            PathRole::Terminus => "terminus",
        }
    }
}

/// Outbound side of a hop, provided by the transport layer.
///
/// Frames handed over are complete, encoded control messages. Implementations
/// must not call back into the same path synchronously.
pub trait HopLink: Send + Sync {
    /// Send `frame` to the neighbouring hop in `direction`.
    fn forward(&self, direction: Direction, frame: Bytes) -> Result<(), LinkError>;

    /// Hand `frame` to another path terminating at this node.
    fn transfer(&self, target: PathId, frame: Bytes) -> Result<(), LinkError>;
}

/// Per-path tunables. Defaults come from the protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    pub probe_timeout_ms: u64,
    pub max_pending_probes: usize,
    pub lifetime_ms: u64,
    /// Tear the path down when a handler rejects one of its messages.
    pub teardown_on_reject: bool,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: PROTOCOL_PARAMS.probe_timeout_ms,
            max_pending_probes: PROTOCOL_PARAMS.max_pending_probes,
            lifetime_ms: PROTOCOL_PARAMS.path_lifetime_ms,
            teardown_on_reject: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,
    #[error("no hop {0}")]
    NoNeighbour(&'static str),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path {0} is closed")]
    Closed(PathId),
    #[error("path {0} already registered")]
    Duplicate(PathId),
    #[error("only the origin may {0}")]
    NotOrigin(&'static str),
    #[error("only the terminus may {0}")]
    NotTerminus(&'static str),
    #[error("too many pending probes (max {max})")]
    TooManyPending { max: usize },
    #[error("probe nonce {0:#018x} already pending")]
    NonceInUse(u64),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Upstream.reverse(), Direction::Downstream);
        assert_eq!(Direction::Downstream.reverse(), Direction::Upstream);
    }

    #[test]
    fn test_default_config_from_params() {
        let cfg = PathConfig::default();
        assert_eq!(cfg.probe_timeout_ms, PROTOCOL_PARAMS.probe_timeout_ms);
        assert_eq!(cfg.lifetime_ms, PROTOCOL_PARAMS.path_lifetime_ms);
        assert!(!cfg.teardown_on_reject);
    }
}
