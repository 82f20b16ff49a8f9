//! Control message kinds carried along a path.
//!
//! Every kind implements [`MessageBody`]; [`Message`] is the closed set of
//! kinds the registry can construct. Adding a kind means a new discriminator,
//! a new `Message` case and a new handler method. The codec does not change.

use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::codec::{Reader, Writer};
use crate::handler::{HandlerResult, MessageHandler};
use crate::registry::Registry;
use crate::{DecodeError, EncodeError, PathId, MAX_MESSAGE_BYTES};

/// Dictionary key holding the discriminator. Sorts before every field key.
pub const DISCRIMINATOR_KEY: &[u8] = b"A";

/// `PathClose` reason: the owner closed the path.
pub const CLOSE_REASON_NORMAL: u64 = 0;
/// `PathClose` reason: the path outlived its lifetime.
pub const CLOSE_REASON_EXPIRED: u64 = 1;
/// `PathClose` reason: a hop rejected a control message.
pub const CLOSE_REASON_REJECTED: u64 = 2;

// ============================================================================
// Kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    PathLatency,
    PathConfirm,
    DataDiscard,
    PathTransfer,
    PathClose,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::PathLatency,
        MessageKind::PathConfirm,
        MessageKind::DataDiscard,
        MessageKind::PathTransfer,
        MessageKind::PathClose,
    ];

    /// Wire discriminator stored under key `A`.
    pub const fn discriminator(&self) -> u8 {
        match self {
            MessageKind::PathLatency => b'L',
            MessageKind::PathConfirm => b'P',
            MessageKind::DataDiscard => b'D',
            MessageKind::PathTransfer => b'T',
            MessageKind::PathClose => b'C',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::PathLatency => "path-latency",
            MessageKind::PathConfirm => "path-confirm",
            MessageKind::DataDiscard => "data-discard",
            MessageKind::PathTransfer => "path-transfer",
            MessageKind::PathClose => "path-close",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Contract
// ============================================================================

/// Behaviour every control message kind provides.
pub trait MessageBody: Default + Into<Message> {
    const KIND: MessageKind;

    /// Keys that must be present on the wire, in ascending order.
    const REQUIRED: &'static [&'static str];

    /// Write field entries in ascending key order. The envelope (dictionary
    /// start, discriminator, dictionary end) is written by [`Message`].
    fn encode_fields(&self, w: &mut Writer) -> Result<(), EncodeError>;

    /// Consume exactly the value for `key`, or fail if the key is not one of
    /// this kind's fields or the value is malformed.
    fn decode_key(&mut self, key: &[u8], r: &mut Reader<'_>) -> Result<(), DecodeError>;

    /// Call the handler method for this kind.
    fn handle<H: MessageHandler + ?Sized>(&self, handler: &mut H) -> HandlerResult;

    /// Checked once every key has been consumed, and before encoding.
    fn validate(&self) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Registry constructor for a kind: an empty instance ready for `decode_key`.
pub fn construct<M: MessageBody>() -> Message {
    M::default().into()
}

fn unknown_key(kind: MessageKind, key: &[u8]) -> DecodeError {
    DecodeError::UnknownKey {
        kind,
        key: String::from_utf8_lossy(key).into_owned(),
    }
}

fn read_fixed<const N: usize>(
    r: &mut Reader<'_>,
    kind: MessageKind,
    key: &'static str,
) -> Result<[u8; N], DecodeError> {
    let bytes = r.read_bytes()?;
    <[u8; N]>::try_from(bytes).map_err(|_| DecodeError::FieldLength {
        kind,
        key,
        expected: N,
        got: bytes.len(),
    })
}

fn as_hex<T: AsRef<[u8]>, S: Serializer>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

// ============================================================================
// Path latency
// ============================================================================

/// Round-trip latency probe.
///
/// The origin sends `T` with `L = 0`; the terminus reflects it unchanged; the
/// origin matches `T` against its pending probes and measures the round trip.
/// A nonzero `L` marks a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PathLatencyMessage {
    /// `T`: correlation nonce, opaque to every hop but the origin.
    pub nonce: u64,
    /// `L`: measured latency in milliseconds, zero on the probe leg.
    pub latency_ms: u64,
}

impl PathLatencyMessage {
    pub fn probe(nonce: u64) -> Self {
        Self {
            nonce,
            latency_ms: 0,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.latency_ms != 0
    }
}

impl MessageBody for PathLatencyMessage {
    const KIND: MessageKind = MessageKind::PathLatency;
    const REQUIRED: &'static [&'static str] = &["T"];

    fn encode_fields(&self, w: &mut Writer) -> Result<(), EncodeError> {
        if self.latency_ms != 0 {
            w.entry_u64(b"L", self.latency_ms)?;
        }
        w.entry_u64(b"T", self.nonce)
    }

    fn decode_key(&mut self, key: &[u8], r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match key {
            b"L" => {
                // Zero is written by omitting the key
                self.latency_ms = r.read_u64()?;
                if self.latency_ms == 0 {
                    return Err(DecodeError::NonCanonical {
                        kind: Self::KIND,
                        key: "L",
                    });
                }
            }
            b"T" => self.nonce = r.read_u64()?,
            _ => return Err(unknown_key(Self::KIND, key)),
        }
        Ok(())
    }

    fn handle<H: MessageHandler + ?Sized>(&self, handler: &mut H) -> HandlerResult {
        handler.on_path_latency(self)
    }
}

// ============================================================================
// Path confirm
// ============================================================================

/// Sent by the terminus once the path is usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PathConfirmMessage {
    /// `L`: path lifetime in milliseconds.
    pub lifetime_ms: u64,
    /// `S`: terminus-local creation time in milliseconds.
    pub created_at_ms: u64,
}

impl MessageBody for PathConfirmMessage {
    const KIND: MessageKind = MessageKind::PathConfirm;
    const REQUIRED: &'static [&'static str] = &["L", "S"];

    fn encode_fields(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.entry_u64(b"L", self.lifetime_ms)?;
        w.entry_u64(b"S", self.created_at_ms)
    }

    fn decode_key(&mut self, key: &[u8], r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match key {
            b"L" => self.lifetime_ms = r.read_u64()?,
            b"S" => self.created_at_ms = r.read_u64()?,
            _ => return Err(unknown_key(Self::KIND, key)),
        }
        Ok(())
    }

    fn handle<H: MessageHandler + ?Sized>(&self, handler: &mut H) -> HandlerResult {
        handler.on_path_confirm(self)
    }
}

// ============================================================================
// Data discard
// ============================================================================

/// Tells the origin that a hop dropped a data message on a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataDiscardMessage {
    /// `P`: path the data was sent on.
    pub path_id: PathId,
    /// `S`: sequence number of the discarded message.
    pub sequence: u64,
}

impl MessageBody for DataDiscardMessage {
    const KIND: MessageKind = MessageKind::DataDiscard;
    const REQUIRED: &'static [&'static str] = &["P", "S"];

    fn encode_fields(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.entry_bytes(b"P", self.path_id.as_bytes())?;
        w.entry_u64(b"S", self.sequence)
    }

    fn decode_key(&mut self, key: &[u8], r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match key {
            b"P" => self.path_id = PathId(read_fixed(r, Self::KIND, "P")?),
            b"S" => self.sequence = r.read_u64()?,
            _ => return Err(unknown_key(Self::KIND, key)),
        }
        Ok(())
    }

    fn handle<H: MessageHandler + ?Sized>(&self, handler: &mut H) -> HandlerResult {
        handler.on_data_discard(self)
    }
}

// ============================================================================
// Path transfer
// ============================================================================

/// Asks the terminus to hand an opaque payload to another path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathTransferMessage {
    /// `P`: target path at the terminus.
    pub target: PathId,
    /// `T`: opaque payload, never inspected by this layer.
    #[serde(serialize_with = "as_hex")]
    pub payload: Bytes,
    /// `Y`: nonce for the payload's own encryption layer.
    #[serde(serialize_with = "as_hex")]
    pub nonce: [u8; 24],
}

impl MessageBody for PathTransferMessage {
    const KIND: MessageKind = MessageKind::PathTransfer;
    const REQUIRED: &'static [&'static str] = &["P", "T", "Y"];

    fn encode_fields(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.entry_bytes(b"P", self.target.as_bytes())?;
        w.entry_bytes(b"T", &self.payload)?;
        w.entry_bytes(b"Y", &self.nonce)
    }

    fn decode_key(&mut self, key: &[u8], r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match key {
            b"P" => self.target = PathId(read_fixed(r, Self::KIND, "P")?),
            b"T" => self.payload = Bytes::copy_from_slice(r.read_bytes()?),
            b"Y" => self.nonce = read_fixed(r, Self::KIND, "Y")?,
            _ => return Err(unknown_key(Self::KIND, key)),
        }
        Ok(())
    }

    fn handle<H: MessageHandler + ?Sized>(&self, handler: &mut H) -> HandlerResult {
        handler.on_path_transfer(self)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.payload.is_empty() {
            return Err(DecodeError::MissingField {
                kind: Self::KIND,
                key: "T",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Path close
// ============================================================================

/// Tears the path down at every hop it reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PathCloseMessage {
    /// `R`: reason code, one of the `CLOSE_REASON_*` constants.
    pub reason: u64,
}

impl MessageBody for PathCloseMessage {
    const KIND: MessageKind = MessageKind::PathClose;
    const REQUIRED: &'static [&'static str] = &["R"];

    fn encode_fields(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.entry_u64(b"R", self.reason)
    }

    fn decode_key(&mut self, key: &[u8], r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match key {
            b"R" => self.reason = r.read_u64()?,
            _ => return Err(unknown_key(Self::KIND, key)),
        }
        Ok(())
    }

    fn handle<H: MessageHandler + ?Sized>(&self, handler: &mut H) -> HandlerResult {
        handler.on_path_close(self)
    }
}

// ============================================================================
// Message
// ============================================================================

/// Any control message, one case per registered discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    PathLatency(PathLatencyMessage),
    PathConfirm(PathConfirmMessage),
    DataDiscard(DataDiscardMessage),
    PathTransfer(PathTransferMessage),
    PathClose(PathCloseMessage),
}

impl From<PathLatencyMessage> for Message {
    fn from(m: PathLatencyMessage) -> Self {
        Message::PathLatency(m)
    }
}

impl From<PathConfirmMessage> for Message {
    fn from(m: PathConfirmMessage) -> Self {
        Message::PathConfirm(m)
    }
}

impl From<DataDiscardMessage> for Message {
    fn from(m: DataDiscardMessage) -> Self {
        Message::DataDiscard(m)
    }
}

impl From<PathTransferMessage> for Message {
    fn from(m: PathTransferMessage) -> Self {
        Message::PathTransfer(m)
    }
}

impl From<PathCloseMessage> for Message {
    fn from(m: PathCloseMessage) -> Self {
        Message::PathClose(m)
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::PathLatency(_) => MessageKind::PathLatency,
            Message::PathConfirm(_) => MessageKind::PathConfirm,
            Message::DataDiscard(_) => MessageKind::DataDiscard,
            Message::PathTransfer(_) => MessageKind::PathTransfer,
            Message::PathClose(_) => MessageKind::PathClose,
        }
    }

    /// Keys a frame of this kind must carry.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            Message::PathLatency(_) => PathLatencyMessage::REQUIRED,
            Message::PathConfirm(_) => PathConfirmMessage::REQUIRED,
            Message::DataDiscard(_) => DataDiscardMessage::REQUIRED,
            Message::PathTransfer(_) => PathTransferMessage::REQUIRED,
            Message::PathClose(_) => PathCloseMessage::REQUIRED,
        }
    }

    /// Encode into a fresh buffer capped at [`MAX_MESSAGE_BYTES`].
    ///
    /// A message that would not decode is refused.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut w = Writer::new();
        self.encode_into(&mut w)?;
        Ok(w.freeze())
    }

    pub fn encode_into(&self, w: &mut Writer) -> Result<(), EncodeError> {
        self.validate().map_err(EncodeError::Invalid)?;
        w.begin_dict()?;
        w.entry_bytes(DISCRIMINATOR_KEY, &[self.kind().discriminator()])?;
        match self {
            Message::PathLatency(m) => m.encode_fields(w)?,
            Message::PathConfirm(m) => m.encode_fields(w)?,
            Message::DataDiscard(m) => m.encode_fields(w)?,
            Message::PathTransfer(m) => m.encode_fields(w)?,
            Message::PathClose(m) => m.encode_fields(w)?,
        }
        w.end_dict()
    }

    /// Decode exactly one message from `buf`.
    ///
    /// Fail-closed: any framing error, unknown discriminator, unknown key,
    /// missing field or malformed value rejects the whole buffer and no
    /// message is returned. Only canonical encodings are accepted, so an
    /// accepted frame re-encodes to the same bytes.
    pub fn decode(buf: &[u8], registry: &Registry) -> Result<Message, DecodeError> {
        if buf.len() > MAX_MESSAGE_BYTES {
            return Err(DecodeError::MessageTooLarge {
                size: buf.len(),
                max: MAX_MESSAGE_BYTES,
            });
        }

        let mut r = Reader::new(buf);
        r.begin_dict()?;
        if r.end_of_dict()? || r.read_bytes()? != DISCRIMINATOR_KEY {
            return Err(DecodeError::MissingDiscriminator);
        }
        let discriminator = match r.read_bytes()? {
            [byte] => *byte,
            other => return Err(DecodeError::InvalidDiscriminator { len: other.len() }),
        };
        let constructor = registry
            .resolve(discriminator)
            .ok_or(DecodeError::UnknownKind(discriminator))?;

        let mut message = constructor();
        let mut seen: Vec<&[u8]> = Vec::with_capacity(4);
        let mut prev_key = DISCRIMINATOR_KEY;
        while !r.end_of_dict()? {
            let key_offset = r.position();
            let key = r.read_bytes()?;
            if key <= prev_key {
                return Err(DecodeError::KeyOrder { offset: key_offset });
            }
            prev_key = key;
            message.decode_key(key, &mut r)?;
            seen.push(key);
        }
        r.finish()?;

        if let Some(key) = message
            .required_keys()
            .iter()
            .find(|key| !seen.contains(&key.as_bytes()))
        {
            return Err(DecodeError::MissingField {
                kind: message.kind(),
                key: *key,
            });
        }
        message.validate()?;
        Ok(message)
    }

    fn decode_key(&mut self, key: &[u8], r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match self {
            Message::PathLatency(m) => m.decode_key(key, r),
            Message::PathConfirm(m) => m.decode_key(key, r),
            Message::DataDiscard(m) => m.decode_key(key, r),
            Message::PathTransfer(m) => m.decode_key(key, r),
            Message::PathClose(m) => m.decode_key(key, r),
        }
    }

    fn validate(&self) -> Result<(), DecodeError> {
        match self {
            Message::PathLatency(m) => m.validate(),
            Message::PathConfirm(m) => m.validate(),
            Message::DataDiscard(m) => m.validate(),
            Message::PathTransfer(m) => m.validate(),
            Message::PathClose(m) => m.validate(),
        }
    }

    /// Hand the message to the handler method for its kind.
    pub fn dispatch<H: MessageHandler + ?Sized>(&self, handler: &mut H) -> HandlerResult {
        match self {
            Message::PathLatency(m) => m.handle(handler),
            Message::PathConfirm(m) => m.handle(handler),
            Message::DataDiscard(m) => m.handle(handler),
            Message::PathTransfer(m) => m.handle(handler),
            Message::PathClose(m) => m.handle(handler),
        }
    }
}
