//! Canonical bencode codec for control messages.
//!
//! Only the subset the control layer needs: dictionaries whose values are
//! byte strings or unsigned integers. Nesting is not supported, so decoding
//! never recurses.
//!
//! Canonical form: dictionary keys strictly ascending, integers and length
//! prefixes without leading zeros or sign.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{DecodeError, EncodeError, MAX_MESSAGE_BYTES};

const DICT_START: u8 = b'd';
const INT_START: u8 = b'i';
const END: u8 = b'e';
const LEN_SEP: u8 = b':';

// ============================================================================
// Reader
// ============================================================================

/// Cursor over one untrusted message buffer.
///
/// Every read either consumes exactly one value or fails; it never reads past
/// the end of the buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Look at the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn next_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = self
            .peek()
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Consume `expected` or fail.
    pub fn expect(&mut self, expected: u8) -> Result<(), DecodeError> {
        let offset = self.pos;
        let byte = self.next_byte()?;
        if byte != expected {
            return Err(DecodeError::UnexpectedByte { byte, offset });
        }
        Ok(())
    }

    pub fn begin_dict(&mut self) -> Result<(), DecodeError> {
        self.expect(DICT_START)
    }

    /// Returns true (and consumes the terminator) when the open dictionary ends.
    pub fn end_of_dict(&mut self) -> Result<bool, DecodeError> {
        match self.peek() {
            None => Err(DecodeError::Truncated { offset: self.pos }),
            Some(END) => {
                self.pos += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Read `i<digits>e` as an unsigned 64-bit integer.
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        self.expect(INT_START)?;

        let first = self.pos;
        let mut value: u64 = 0;
        loop {
            let offset = self.pos;
            match self.next_byte()? {
                END if offset == first => return Err(DecodeError::InvalidInteger { offset }),
                END => break,
                b'-' if offset == first => return Err(DecodeError::NegativeInteger { offset }),
                digit @ b'0'..=b'9' => {
                    if offset > first && self.buf[first] == b'0' {
                        return Err(DecodeError::InvalidInteger { offset: first });
                    }
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(u64::from(digit - b'0')))
                        .ok_or(DecodeError::IntegerOverflow { offset: start })?;
                }
                _ => return Err(DecodeError::InvalidInteger { offset }),
            }
        }
        Ok(value)
    }

    /// Read `<len>:<bytes>`, borrowing the bytes from the input buffer.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        let mut len: usize = 0;
        loop {
            let offset = self.pos;
            match self.next_byte()? {
                LEN_SEP if offset == start => return Err(DecodeError::InvalidLength { offset }),
                LEN_SEP => break,
                digit @ b'0'..=b'9' => {
                    if offset > start && self.buf[start] == b'0' {
                        return Err(DecodeError::InvalidLength { offset: start });
                    }
                    len = len
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(usize::from(digit - b'0')))
                        .ok_or(DecodeError::InvalidLength { offset: start })?;
                }
                b'-' => return Err(DecodeError::InvalidLength { offset }),
                byte => return Err(DecodeError::UnexpectedByte { byte, offset }),
            }
        }

        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                offset: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Fail unless the whole buffer has been consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes {
                len: self.remaining(),
            })
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Append-only canonical encoder.
///
/// Refuses to grow past its size limit and refuses dictionary keys that are
/// not strictly ascending.
#[derive(Debug)]
pub struct Writer {
    buf: BytesMut,
    limit: usize,
    /// Last key written in each open dictionary, innermost last.
    keys: Vec<Option<Vec<u8>>>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        Self::with_limit(MAX_MESSAGE_BYTES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(64.min(limit)),
            limit,
            keys: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn reserve(&mut self, additional: usize) -> Result<(), EncodeError> {
        let size = self.buf.len() + additional;
        if size > self.limit {
            return Err(EncodeError::MessageTooLarge {
                size,
                max: self.limit,
            });
        }
        self.buf.reserve(additional);
        Ok(())
    }

    pub fn begin_dict(&mut self) -> Result<(), EncodeError> {
        self.reserve(1)?;
        self.buf.put_u8(DICT_START);
        self.keys.push(None);
        Ok(())
    }

    pub fn end_dict(&mut self) -> Result<(), EncodeError> {
        if self.keys.pop().is_none() {
            return Err(EncodeError::NotInDictionary);
        }
        self.reserve(1)?;
        self.buf.put_u8(END);
        Ok(())
    }

    fn put_key(&mut self, key: &[u8]) -> Result<(), EncodeError> {
        let last = self.keys.last_mut().ok_or(EncodeError::NotInDictionary)?;
        if last.as_deref().is_some_and(|prev| key <= prev) {
            return Err(EncodeError::KeyOrder {
                key: String::from_utf8_lossy(key).into_owned(),
            });
        }
        *last = Some(key.to_vec());
        self.put_bytes(key)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let prefix = bytes.len().to_string();
        self.reserve(prefix.len() + 1 + bytes.len())?;
        self.buf.put_slice(prefix.as_bytes());
        self.buf.put_u8(LEN_SEP);
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<(), EncodeError> {
        let digits = value.to_string();
        self.reserve(digits.len() + 2)?;
        self.buf.put_u8(INT_START);
        self.buf.put_slice(digits.as_bytes());
        self.buf.put_u8(END);
        Ok(())
    }

    /// Write `key` followed by an integer value inside the open dictionary.
    pub fn entry_u64(&mut self, key: &[u8], value: u64) -> Result<(), EncodeError> {
        self.put_key(key)?;
        self.put_u64(value)
    }

    /// Write `key` followed by a byte-string value inside the open dictionary.
    pub fn entry_bytes(&mut self, key: &[u8], value: &[u8]) -> Result<(), EncodeError> {
        self.put_key(key)?;
        self.put_bytes(value)
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u64() {
        assert_eq!(Reader::new(b"i0e").read_u64().unwrap(), 0);
        assert_eq!(Reader::new(b"i42e").read_u64().unwrap(), 42);
        assert_eq!(
            Reader::new(b"i18446744073709551615e").read_u64().unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn test_read_u64_rejects_non_canonical() {
        assert!(matches!(
            Reader::new(b"i-1e").read_u64(),
            Err(DecodeError::NegativeInteger { .. })
        ));
        assert!(matches!(
            Reader::new(b"i007e").read_u64(),
            Err(DecodeError::InvalidInteger { .. })
        ));
        assert!(matches!(
            Reader::new(b"iee").read_u64(),
            Err(DecodeError::InvalidInteger { .. })
        ));
        assert!(matches!(
            Reader::new(b"i1x2e").read_u64(),
            Err(DecodeError::InvalidInteger { .. })
        ));
        assert!(matches!(
            Reader::new(b"i18446744073709551616e").read_u64(),
            Err(DecodeError::IntegerOverflow { .. })
        ));
        assert!(matches!(
            Reader::new(b"i12").read_u64(),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_read_bytes() {
        let mut r = Reader::new(b"3:abc0:");
        assert_eq!(r.read_bytes().unwrap(), b"abc");
        assert_eq!(r.read_bytes().unwrap(), b"");
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_read_bytes_rejects_bad_lengths() {
        assert!(matches!(
            Reader::new(b"5:abc").read_bytes(),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            Reader::new(b"03:abc").read_bytes(),
            Err(DecodeError::InvalidLength { .. })
        ));
        assert!(matches!(
            Reader::new(b"-3:abc").read_bytes(),
            Err(DecodeError::InvalidLength { .. })
        ));
        assert!(matches!(
            Reader::new(b":abc").read_bytes(),
            Err(DecodeError::InvalidLength { .. })
        ));
        assert!(matches!(
            Reader::new(b"99999999999999999999999:x").read_bytes(),
            Err(DecodeError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_writer_canonical_dict() {
        let mut w = Writer::new();
        w.begin_dict().unwrap();
        w.entry_bytes(b"A", b"L").unwrap();
        w.entry_u64(b"T", 7).unwrap();
        w.end_dict().unwrap();
        assert_eq!(&w.freeze()[..], b"d1:A1:L1:Ti7ee");
    }

    #[test]
    fn test_writer_rejects_unsorted_keys() {
        let mut w = Writer::new();
        w.begin_dict().unwrap();
        w.entry_u64(b"T", 1).unwrap();
        assert!(matches!(
            w.entry_u64(b"L", 1),
            Err(EncodeError::KeyOrder { .. })
        ));
        assert!(matches!(
            w.entry_u64(b"T", 2),
            Err(EncodeError::KeyOrder { .. })
        ));
    }

    #[test]
    fn test_writer_enforces_limit() {
        let mut w = Writer::with_limit(8);
        w.begin_dict().unwrap();
        let err = w.entry_bytes(b"T", &[0u8; 16]).unwrap_err();
        assert!(matches!(err, EncodeError::MessageTooLarge { max: 8, .. }));
    }

    #[test]
    fn test_writer_entry_outside_dict() {
        let mut w = Writer::new();
        assert_eq!(w.entry_u64(b"T", 1), Err(EncodeError::NotInDictionary));
        assert_eq!(w.end_dict(), Err(EncodeError::NotInDictionary));
    }
}
