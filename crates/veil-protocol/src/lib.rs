//! Veil Protocol -- path control messages, canonical codec, dispatch contract.
//!
//! Control messages travel hop-by-hop inside an established onion path.
//! Each message is one bencode dictionary: key `A` holds a one-byte
//! discriminator, the remaining single-letter keys are variant fields.

pub mod codec;
pub mod dispatch;
pub mod handler;
pub mod messages;
pub mod params;
pub mod registry;

use std::fmt;

use serde::{Serialize, Serializer};

pub use codec::{Reader, Writer};
pub use dispatch::{process, Outcome};
pub use handler::{HandlerResult, MessageHandler, Rejection};
pub use messages::*;
pub use params::{ProtocolParams, PROTOCOL_PARAMS};
pub use registry::{Constructor, Registry, RegistryError};

/// Log target for decode failures and dispatch outcomes.
pub const LOG_TARGET: &str = "veil::control";

/// Maximum encoded control message size (sourced from protocol params).
pub const MAX_MESSAGE_BYTES: usize = PROTOCOL_PARAMS.max_message_bytes;

/// Path identifier (16 opaque bytes, chosen per hop at build time).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(pub [u8; 16]);

impl PathId {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for PathId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

/// Coarse classification of decode failures, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Dictionary structure is broken; no variant was constructed.
    Framing,
    /// Well-formed dictionary with an unregistered discriminator.
    UnknownKind,
    /// Known kind, but a field is unrecognised or malformed.
    Field,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Framing => "framing",
            ErrorCategory::UnknownKind => "unknown-kind",
            ErrorCategory::Field => "field",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },
    #[error("invalid length prefix at offset {offset}")]
    InvalidLength { offset: usize },
    #[error("invalid integer at offset {offset}")]
    InvalidInteger { offset: usize },
    #[error("negative integer at offset {offset}")]
    NegativeInteger { offset: usize },
    #[error("integer overflow at offset {offset}")]
    IntegerOverflow { offset: usize },
    #[error("dictionary key out of order or duplicated at offset {offset}")]
    KeyOrder { offset: usize },
    #[error("{len} trailing bytes after message")]
    TrailingBytes { len: usize },
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("first key is not the discriminator")]
    MissingDiscriminator,
    #[error("discriminator must be one byte, got {len}")]
    InvalidDiscriminator { len: usize },
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),
    #[error("{kind}: unrecognised key {key:?}")]
    UnknownKey { kind: MessageKind, key: String },
    #[error("{kind}: field {key} must be {expected} bytes, got {got}")]
    FieldLength {
        kind: MessageKind,
        key: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{kind}: missing field {key}")]
    MissingField { kind: MessageKind, key: &'static str },
    #[error("{kind}: non-canonical value for {key}")]
    NonCanonical { kind: MessageKind, key: &'static str },
}

impl DecodeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DecodeError::UnknownKind(_) => ErrorCategory::UnknownKind,
            DecodeError::UnknownKey { .. }
            | DecodeError::FieldLength { .. }
            | DecodeError::MissingField { .. }
            | DecodeError::NonCanonical { .. } => ErrorCategory::Field,
            _ => ErrorCategory::Framing,
        }
    }

    /// Message kind the failure belongs to, when the discriminator was resolved.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            DecodeError::UnknownKey { kind, .. }
            | DecodeError::FieldLength { kind, .. }
            | DecodeError::MissingField { kind, .. }
            | DecodeError::NonCanonical { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("dictionary key {key:?} not greater than previous key")]
    KeyOrder { key: String },
    #[error("no open dictionary")]
    NotInDictionary,
    #[error("refusing to encode invalid message: {0}")]
    Invalid(DecodeError),
}
