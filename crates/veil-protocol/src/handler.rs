//! Handler interface -- the per-hop side of dispatch.
//!
//! A decoded message calls exactly one method here. The default bodies reject
//! with [`Rejection::Unsupported`], so a handler only implements the kinds it
//! expects to see.

use crate::messages::{
    DataDiscardMessage, MessageKind, PathCloseMessage, PathConfirmMessage, PathLatencyMessage,
    PathTransferMessage,
};

/// A handler's semantic refusal of a well-formed message.
///
/// Returned to whoever fed the bytes in; the path owner decides whether it
/// warrants tearing the path down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("{0} is not handled here")]
    Unsupported(MessageKind),
    #[error("{kind} is not valid at a {role} hop")]
    OutOfRole {
        kind: MessageKind,
        role: &'static str,
    },
    #[error("{kind} travelling the wrong way")]
    WrongDirection { kind: MessageKind },
    #[error("path is closed")]
    PathClosed,
    #[error("{0}")]
    Invalid(String),
    #[error("link failure: {0}")]
    Link(String),
}

pub type HandlerResult = Result<(), Rejection>;

pub trait MessageHandler {
    fn on_path_latency(&mut self, _msg: &PathLatencyMessage) -> HandlerResult {
        Err(Rejection::Unsupported(MessageKind::PathLatency))
    }

    fn on_path_confirm(&mut self, _msg: &PathConfirmMessage) -> HandlerResult {
        Err(Rejection::Unsupported(MessageKind::PathConfirm))
    }

    fn on_data_discard(&mut self, _msg: &DataDiscardMessage) -> HandlerResult {
        Err(Rejection::Unsupported(MessageKind::DataDiscard))
    }

    fn on_path_transfer(&mut self, _msg: &PathTransferMessage) -> HandlerResult {
        Err(Rejection::Unsupported(MessageKind::PathTransfer))
    }

    fn on_path_close(&mut self, _msg: &PathCloseMessage) -> HandlerResult {
        Err(Rejection::Unsupported(MessageKind::PathClose))
    }
}
