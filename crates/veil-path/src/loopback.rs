//! In-memory hop chain for simulation and tests.
//!
//! Hop `i` forwards upstream to hop `i + 1` and downstream to hop `i - 1`.
//! Frames queue in the fabric until someone pumps them, so nothing is
//! delivered re-entrantly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use veil_protocol::{Outcome, PathId};

use crate::clock::Clock;
use crate::context::PathContext;
use crate::{Direction, HopLink, LinkError, PathConfig, PathRole};

/// A frame in flight between two hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Index of the receiving hop.
    pub to: usize,
    pub heading: Direction,
    pub frame: Bytes,
}

#[derive(Debug)]
pub struct LoopbackFabric {
    hops: usize,
    queue: Mutex<VecDeque<Envelope>>,
    transfers: Mutex<Vec<(PathId, Bytes)>>,
}

impl LoopbackFabric {
    pub fn new(hops: usize) -> Arc<Self> {
        Arc::new(Self {
            hops,
            queue: Mutex::new(VecDeque::new()),
            transfers: Mutex::new(Vec::new()),
        })
    }

    /// The link hop `index` sends through.
    pub fn link(self: &Arc<Self>, index: usize) -> Arc<LoopbackLink> {
        Arc::new(LoopbackLink {
            fabric: self.clone(),
            index,
        })
    }

    pub fn push(&self, envelope: Envelope) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(envelope);
    }

    pub fn pop(&self) -> Option<Envelope> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn in_flight(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Frames handed to other paths by a terminus.
    pub fn transfers(&self) -> Vec<(PathId, Bytes)> {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver queued frames to `hops` until the fabric is empty.
    pub fn pump(&self, hops: &[Arc<PathContext>]) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(envelope) = self.pop() {
            if let Some(hop) = hops.get(envelope.to) {
                outcomes.push(hop.receive(envelope.heading, &envelope.frame));
            }
        }
        outcomes
    }
}

/// One hop's attachment to a [`LoopbackFabric`].
#[derive(Debug)]
pub struct LoopbackLink {
    fabric: Arc<LoopbackFabric>,
    index: usize,
}

impl HopLink for LoopbackLink {
    fn forward(&self, direction: Direction, frame: Bytes) -> Result<(), LinkError> {
        let to = match direction {
            Direction::Upstream if self.index + 1 < self.fabric.hops => self.index + 1,
            Direction::Downstream if self.index > 0 => self.index - 1,
            _ => return Err(LinkError::NoNeighbour(direction.as_str())),
        };
        self.fabric.push(Envelope {
            to,
            heading: direction,
            frame,
        });
        Ok(())
    }

    fn transfer(&self, target: PathId, frame: Bytes) -> Result<(), LinkError> {
        self.fabric
            .transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target, frame));
        Ok(())
    }
}

/// Build an origin, `hops - 2` relays and a terminus on one fabric.
///
/// Every hop gets its own random path id, as after a real build.
pub fn build_chain(
    hops: usize,
    config: PathConfig,
    clock: Arc<dyn Clock>,
) -> (Arc<LoopbackFabric>, Vec<Arc<PathContext>>) {
    let hops = hops.max(2);
    let fabric = LoopbackFabric::new(hops);
    let chain = (0..hops)
        .map(|i| {
            let role = if i == 0 {
                PathRole::Origin
            } else if i == hops - 1 {
                PathRole::Terminus
            } else {
                PathRole::Relay
            };
            Arc::new(PathContext::new(
                PathId::random(),
                role,
                config.clone(),
                fabric.link(i),
                clock.clone(),
            ))
        })
        .collect();
    (fabric, chain)
}
