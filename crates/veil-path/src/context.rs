//! One hop's state for one path, and the handler that drives it.
//!
//! All mutable state sits behind a single per-path mutex. The lock is never
//! held while calling the link.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use veil_protocol::{
    process, DataDiscardMessage, HandlerResult, Message, MessageHandler, MessageKind, Outcome,
    PathCloseMessage, PathConfirmMessage, PathId, PathLatencyMessage, PathTransferMessage,
    Registry, Rejection, CLOSE_REASON_EXPIRED, CLOSE_REASON_REJECTED,
};

use crate::clock::Clock;
use crate::pending::{PendingProbe, PendingProbes};
use crate::{Direction, HopLink, PathConfig, PathError, PathRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Origin only: waiting for the terminus to confirm.
    Building,
    Established,
    Closed,
}

impl PathStatus {
    pub fn name(&self) -> &'static str {
        match self {
            PathStatus::Building => "building",
            PathStatus::Established => "established",
            PathStatus::Closed => "closed",
        }
    }
}

/// Counters kept per path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathStats {
    pub probes_sent: u64,
    pub replies_matched: u64,
    pub probes_expired: u64,
    pub discards_reported: u64,
    pub rejections: u64,
}

/// Result of one [`PathContext::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probes_expired: usize,
    /// The path is closed after the sweep, either already or because its
    /// lifetime ran out.
    pub closed: bool,
}

struct PathState {
    status: PathStatus,
    pending: PendingProbes,
    latency_ms: Option<u64>,
    expires_at_ms: u64,
    stats: PathStats,
}

pub struct PathContext {
    id: PathId,
    role: PathRole,
    config: PathConfig,
    clock: Arc<dyn Clock>,
    link: Arc<dyn HopLink>,
    registry: &'static Registry,
    span: tracing::Span,
    state: Mutex<PathState>,
}

impl std::fmt::Debug for PathContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathContext")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("status", &self.status())
            .finish()
    }
}

impl PathContext {
    pub fn new(
        id: PathId,
        role: PathRole,
        config: PathConfig,
        link: Arc<dyn HopLink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let status = match role {
            PathRole::Origin => PathStatus::Building,
            PathRole::Relay | PathRole::Terminus => PathStatus::Established,
        };
        let state = PathState {
            status,
            pending: PendingProbes::new(config.max_pending_probes),
            latency_ms: None,
            expires_at_ms: clock.now_ms().saturating_add(config.lifetime_ms),
            stats: PathStats::default(),
        };
        Self {
            span: tracing::info_span!("path", id = %id, role = role.name()),
            id,
            role,
            config,
            clock,
            link,
            registry: Registry::global(),
            state: Mutex::new(state),
        }
    }

    /// Decode with `registry` instead of the global one.
    pub fn with_registry(mut self, registry: &'static Registry) -> Self {
        self.registry = registry;
        self
    }

    fn state(&self) -> MutexGuard<'_, PathState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn role(&self) -> PathRole {
        self.role
    }

    pub fn status(&self) -> PathStatus {
        self.state().status
    }

    pub fn is_closed(&self) -> bool {
        self.status() == PathStatus::Closed
    }

    /// Most recent measured round trip, in milliseconds.
    pub fn latency_ms(&self) -> Option<u64> {
        self.state().latency_ms
    }

    pub fn pending_probes(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_pending(&self, nonce: u64) -> bool {
        self.state().pending.contains(nonce)
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.state().expires_at_ms
    }

    pub fn stats(&self) -> PathStats {
        self.state().stats
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn send(&self, direction: Direction, message: Message) -> Result<(), PathError> {
        let frame = message.encode()?;
        self.link.forward(direction, frame)?;
        Ok(())
    }

    /// Issue a latency probe with a fresh nonce. Origin only.
    pub fn send_latency_probe(&self) -> Result<u64, PathError> {
        loop {
            let nonce = rand::random::<u64>();
            match self.send_latency_probe_with_nonce(nonce) {
                Ok(()) => return Ok(nonce),
                Err(PathError::NonceInUse(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Issue a latency probe with a caller-chosen nonce. Origin only.
    pub fn send_latency_probe_with_nonce(&self, nonce: u64) -> Result<(), PathError> {
        if self.role != PathRole::Origin {
            return Err(PathError::NotOrigin("send latency probes"));
        }
        let now = self.clock.now_ms();
        {
            let mut state = self.state();
            if state.status == PathStatus::Closed {
                return Err(PathError::Closed(self.id));
            }
            state.pending.insert(
                nonce,
                PendingProbe {
                    path_id: self.id,
                    sent_at_ms: now,
                },
            )?;
        }

        if let Err(e) = self.send(Direction::Upstream, PathLatencyMessage::probe(nonce).into()) {
            self.state().pending.take(nonce);
            return Err(e);
        }
        self.state().stats.probes_sent += 1;
        tracing::debug!(
            parent: &self.span,
            nonce = format_args!("{nonce:#018x}"),
            sent_at_ms = now,
            "path: latency probe sent"
        );
        Ok(())
    }

    /// Tell the origin the path is usable. Terminus only.
    pub fn confirm(&self, lifetime_ms: u64) -> Result<(), PathError> {
        if self.role != PathRole::Terminus {
            return Err(PathError::NotTerminus("confirm a path"));
        }
        let now = self.clock.now_ms();
        {
            let mut state = self.state();
            if state.status == PathStatus::Closed {
                return Err(PathError::Closed(self.id));
            }
            state.expires_at_ms = now.saturating_add(lifetime_ms);
        }
        let confirm = PathConfirmMessage {
            lifetime_ms,
            created_at_ms: now,
        };
        self.send(Direction::Downstream, confirm.into())
    }

    /// Notify neighbouring hops and tear the path down.
    ///
    /// The path is torn down even when a neighbour cannot be reached; the
    /// link error is still returned.
    pub fn close(&self, reason: u64) -> Result<(), PathError> {
        if self.is_closed() {
            return Err(PathError::Closed(self.id));
        }
        let frame = Message::from(PathCloseMessage { reason }).encode()?;
        let directions: &[Direction] = match self.role {
            PathRole::Origin => &[Direction::Upstream],
            PathRole::Terminus => &[Direction::Downstream],
            PathRole::Relay => &[Direction::Upstream, Direction::Downstream],
        };

        let mut result = Ok(());
        for direction in directions {
            if let Err(e) = self.link.forward(*direction, frame.clone()) {
                result = Err(PathError::Link(e));
            }
        }
        self.teardown();
        result
    }

    /// Mark the path closed and drop every pending probe, atomically.
    ///
    /// Returns the number of probes dropped. Idempotent.
    pub fn teardown(&self) -> usize {
        let dropped = {
            let mut state = self.state();
            if state.status == PathStatus::Closed {
                return 0;
            }
            state.status = PathStatus::Closed;
            state.pending.clear()
        };
        tracing::info!(parent: &self.span, pending_dropped = dropped, "path: torn down");
        dropped
    }

    /// Expire lost probes and close the path if its lifetime has run out.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let (expired, lifetime_over) = {
            let mut state = self.state();
            if state.status == PathStatus::Closed {
                return SweepReport {
                    probes_expired: 0,
                    closed: true,
                };
            }
            let expired = state.pending.expire(now, self.config.probe_timeout_ms);
            state.stats.probes_expired += expired.len() as u64;
            (expired, now >= state.expires_at_ms)
        };

        for nonce in &expired {
            tracing::debug!(
                parent: &self.span,
                nonce = format_args!("{nonce:#018x}"),
                "path: latency probe lost"
            );
        }
        if lifetime_over {
            tracing::info!(parent: &self.span, now_ms = now, "path: lifetime elapsed");
            if let Err(e) = self.close(CLOSE_REASON_EXPIRED) {
                tracing::debug!(parent: &self.span, "path: close notification failed: {e}");
            }
        }
        SweepReport {
            probes_expired: expired.len(),
            closed: lifetime_over,
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Decode and handle one control message travelling in `heading`.
    pub fn receive(&self, heading: Direction, frame: &[u8]) -> Outcome {
        let _enter = self.span.enter();
        let mut handler = HopHandler { ctx: self, heading };
        let outcome = process(frame, self.registry, &mut handler);

        if let Outcome::Rejected { kind, reason } = &outcome {
            self.state().stats.rejections += 1;
            if self.config.teardown_on_reject && !self.is_closed() {
                tracing::warn!(%kind, %reason, "path: closing after rejected message");
                if let Err(e) = self.close(CLOSE_REASON_REJECTED) {
                    tracing::debug!("path: close notification failed: {e}");
                }
            }
        }
        outcome
    }

    fn resolve_probe(&self, msg: &PathLatencyMessage) {
        let now = self.clock.now_ms();
        let resolved = {
            let mut state = self.state();
            let probe = state.pending.take(msg.nonce);
            if let Some(probe) = probe {
                let latency = now.saturating_sub(probe.sent_at_ms);
                state.latency_ms = Some(latency);
                state.stats.replies_matched += 1;
                Some(latency)
            } else {
                None
            }
        };

        match resolved {
            Some(latency_ms) => tracing::debug!(
                nonce = format_args!("{:#018x}", msg.nonce),
                latency_ms,
                "path: latency probe resolved"
            ),
            None => tracing::debug!(
                nonce = format_args!("{:#018x}", msg.nonce),
                "path: unmatched latency reply ignored"
            ),
        }
    }

    fn mark_established(&self, lifetime_ms: u64) {
        let now = self.clock.now_ms();
        let mut state = self.state();
        state.status = PathStatus::Established;
        state.expires_at_ms = now.saturating_add(lifetime_ms);
    }
}

/// Handler bound to one inbound message's direction of travel.
struct HopHandler<'a> {
    ctx: &'a PathContext,
    heading: Direction,
}

impl HopHandler<'_> {
    fn forward(&self, direction: Direction, message: Message) -> HandlerResult {
        let frame = message
            .encode()
            .map_err(|e| Rejection::Invalid(e.to_string()))?;
        self.ctx
            .link
            .forward(direction, frame)
            .map_err(|e| Rejection::Link(e.to_string()))
    }

    fn out_of_role(&self, kind: MessageKind) -> Rejection {
        Rejection::OutOfRole {
            kind,
            role: self.ctx.role.name(),
        }
    }

    fn expect_heading(&self, kind: MessageKind, heading: Direction) -> HandlerResult {
        if self.heading != heading {
            return Err(Rejection::WrongDirection { kind });
        }
        Ok(())
    }

    fn ensure_open(&self) -> HandlerResult {
        if self.ctx.is_closed() {
            return Err(Rejection::PathClosed);
        }
        Ok(())
    }
}

impl MessageHandler for HopHandler<'_> {
    fn on_path_latency(&mut self, msg: &PathLatencyMessage) -> HandlerResult {
        let kind = MessageKind::PathLatency;
        // Late replies for a closed path are inert
        if self.ctx.is_closed() {
            return Ok(());
        }
        match self.ctx.role {
            PathRole::Origin => {
                self.expect_heading(kind, Direction::Downstream)?;
                self.ctx.resolve_probe(msg);
                Ok(())
            }
            PathRole::Relay => self.forward(self.heading, (*msg).into()),
            PathRole::Terminus => {
                self.expect_heading(kind, Direction::Upstream)?;
                if msg.is_reply() {
                    return Err(Rejection::Invalid("latency reply reached the terminus".into()));
                }
                self.forward(Direction::Downstream, (*msg).into())
            }
        }
    }

    fn on_path_confirm(&mut self, msg: &PathConfirmMessage) -> HandlerResult {
        let kind = MessageKind::PathConfirm;
        self.ensure_open()?;
        match self.ctx.role {
            PathRole::Origin => {
                self.expect_heading(kind, Direction::Downstream)?;
                if msg.lifetime_ms == 0 {
                    return Err(Rejection::Invalid("zero path lifetime".into()));
                }
                self.ctx.mark_established(msg.lifetime_ms);
                tracing::info!(lifetime_ms = msg.lifetime_ms, "path: established");
                Ok(())
            }
            PathRole::Relay => self.forward(self.heading, (*msg).into()),
            PathRole::Terminus => Err(self.out_of_role(kind)),
        }
    }

    fn on_data_discard(&mut self, msg: &DataDiscardMessage) -> HandlerResult {
        let kind = MessageKind::DataDiscard;
        self.ensure_open()?;
        match self.ctx.role {
            PathRole::Origin => {
                self.expect_heading(kind, Direction::Downstream)?;
                self.ctx.state().stats.discards_reported += 1;
                tracing::debug!(
                    discarded_on = %msg.path_id,
                    sequence = msg.sequence,
                    "path: hop discarded data"
                );
                Ok(())
            }
            PathRole::Relay => self.forward(self.heading, (*msg).into()),
            PathRole::Terminus => Err(self.out_of_role(kind)),
        }
    }

    fn on_path_transfer(&mut self, msg: &PathTransferMessage) -> HandlerResult {
        let kind = MessageKind::PathTransfer;
        self.ensure_open()?;
        match self.ctx.role {
            PathRole::Origin => Err(self.out_of_role(kind)),
            PathRole::Relay => self.forward(self.heading, msg.clone().into()),
            PathRole::Terminus => {
                self.expect_heading(kind, Direction::Upstream)?;
                if msg.target == self.ctx.id {
                    return Err(Rejection::Invalid("transfer onto its own path".into()));
                }
                let frame = Message::from(msg.clone())
                    .encode()
                    .map_err(|e| Rejection::Invalid(e.to_string()))?;
                self.ctx
                    .link
                    .transfer(msg.target, frame)
                    .map_err(|e| Rejection::Link(e.to_string()))?;
                tracing::debug!(
                    target_path = %msg.target,
                    len = msg.payload.len(),
                    "path: payload transferred"
                );
                Ok(())
            }
        }
    }

    fn on_path_close(&mut self, msg: &PathCloseMessage) -> HandlerResult {
        if self.ctx.is_closed() {
            return Ok(());
        }
        tracing::info!(reason = msg.reason, "path: close received");
        let forwarded = match self.ctx.role {
            PathRole::Relay => self.forward(self.heading, (*msg).into()),
            PathRole::Origin | PathRole::Terminus => Ok(()),
        };
        self.ctx.teardown();
        forwarded
    }
}
