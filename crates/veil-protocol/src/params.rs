//! Protocol parameters -- the timing and size limits every hop on a path
//! must agree on.
//!
//! Node-local choices (log level, sweep cadence overrides) live in the node
//! config; its defaults are sourced from here.

/// A named, versioned set of control-layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Parameter set identifier. Monotonically increasing.
    pub id: u16,

    // -- Wire --
    /// Maximum encoded size of one control message.
    pub max_message_bytes: usize,

    // -- Latency probes --
    /// Milliseconds before an unanswered probe is considered lost.
    pub probe_timeout_ms: u64,
    /// Maximum concurrently pending probes on one path.
    pub max_pending_probes: usize,
    /// Milliseconds between probes issued by a path's origin.
    pub probe_interval_ms: u64,

    // -- Path lifecycle --
    /// Default path lifetime in milliseconds, until a confirm says otherwise.
    pub path_lifetime_ms: u64,
    /// Milliseconds between pending-table and expiry sweeps.
    pub sweep_interval_ms: u64,
}

/// Parameter set 0.
///
/// Paths live ten minutes. A probe that has not come back within ten seconds
/// is lost; the path's owner decides whether to send another.
pub const PROTOCOL_PARAMS: ProtocolParams = ProtocolParams {
    id: 0,

    // Wire
    max_message_bytes: 8 * 1024,

    // Latency probes
    probe_timeout_ms: 10_000,
    max_pending_probes: 32,
    probe_interval_ms: 5_000,

    // Path lifecycle
    path_lifetime_ms: 10 * 60 * 1000,
    sweep_interval_ms: 1_000,
};
