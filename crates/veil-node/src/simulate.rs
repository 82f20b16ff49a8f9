//! Loopback simulation -- one path over in-memory hops with a fixed delay
//! per hop, driven by a manual clock. Used by `veil-node simulate`.

use std::sync::Arc;

use serde::Serialize;
use veil_path::loopback::{build_chain, LoopbackFabric};
use veil_path::{ManualClock, PathConfig, PathContext, PathError, PathStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub nonce: String,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub hops: usize,
    pub delay_ms: u64,
    pub established: bool,
    pub probes: Vec<ProbeResult>,
    /// Frames the hops rejected or dropped along the way.
    pub failures: usize,
}

/// Deliver everything in flight, advancing the clock `delay_ms` per frame.
fn drain(
    fabric: &LoopbackFabric,
    chain: &[Arc<PathContext>],
    clock: &ManualClock,
    delay_ms: u64,
) -> usize {
    let mut failures = 0;
    while let Some(envelope) = fabric.pop() {
        clock.advance(delay_ms);
        if let Some(hop) = chain.get(envelope.to) {
            if !hop.receive(envelope.heading, &envelope.frame).is_accepted() {
                failures += 1;
            }
        }
    }
    failures
}

/// Build a `hops`-hop path, confirm it, then send `probes` latency probes
/// one after another.
pub fn run(
    hops: usize,
    delay_ms: u64,
    probes: usize,
    config: PathConfig,
) -> Result<SimulationReport, PathError> {
    let clock = Arc::new(ManualClock::new(0));
    let (fabric, chain) = build_chain(hops, config.clone(), clock.clone());
    let [origin, .., terminus] = chain.as_slice() else {
        return Ok(SimulationReport {
            hops: chain.len(),
            delay_ms,
            established: false,
            probes: Vec::new(),
            failures: 0,
        });
    };

    terminus.confirm(config.lifetime_ms)?;
    let mut failures = drain(&fabric, &chain, &clock, delay_ms);

    let mut results = Vec::with_capacity(probes);
    for _ in 0..probes {
        let nonce = origin.send_latency_probe()?;
        failures += drain(&fabric, &chain, &clock, delay_ms);
        let latency_ms = if origin.is_pending(nonce) {
            None
        } else {
            origin.latency_ms()
        };
        results.push(ProbeResult {
            nonce: format!("{nonce:#018x}"),
            latency_ms,
        });
    }

    Ok(SimulationReport {
        hops: chain.len(),
        delay_ms,
        established: origin.status() == PathStatus::Established,
        probes: results,
        failures,
    })
}
