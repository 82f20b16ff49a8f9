//! Decode-and-dispatch entry point for inbound control bytes.

use crate::handler::{MessageHandler, Rejection};
use crate::messages::{Message, MessageKind};
use crate::registry::Registry;
use crate::{DecodeError, LOG_TARGET};

/// What became of one inbound buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Decoded and accepted by the handler.
    Accepted(MessageKind),
    /// Decoded, but the handler refused it.
    Rejected { kind: MessageKind, reason: Rejection },
    /// Malformed or unknown; nothing was dispatched.
    Dropped(DecodeError),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Outcome::Accepted(kind) | Outcome::Rejected { kind, .. } => Some(*kind),
            Outcome::Dropped(e) => e.kind(),
        }
    }
}

/// Decode one message from `frame` and dispatch it to `handler`.
///
/// Decode failures are logged and reported as [`Outcome::Dropped`]; the
/// handler never sees a partially decoded message.
pub fn process<H: MessageHandler + ?Sized>(
    frame: &[u8],
    registry: &Registry,
    handler: &mut H,
) -> Outcome {
    let message = match Message::decode(frame, registry) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                target: LOG_TARGET,
                category = e.category().as_str(),
                kind = e.kind().map(|k| k.name()),
                len = frame.len(),
                error = %e,
                "control: dropping malformed message"
            );
            return Outcome::Dropped(e);
        }
    };

    let kind = message.kind();
    match message.dispatch(handler) {
        Ok(()) => {
            tracing::debug!(target: LOG_TARGET, %kind, "control: message accepted");
            Outcome::Accepted(kind)
        }
        Err(reason) => {
            tracing::debug!(target: LOG_TARGET, %kind, %reason, "control: message rejected");
            Outcome::Rejected { kind, reason }
        }
    }
}
