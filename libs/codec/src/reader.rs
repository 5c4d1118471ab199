//! Bounds-checked message reader
//!
//! Wraps the body of one inbound message. Every accessor checks the remaining
//! length first and reports which field was truncated, so a malformed message
//! turns into a [`ProtocolError`] instead of a panic.

use crate::error::{ProtocolError, ProtocolResult};
use crate::packed;
use bytes::{Buf, Bytes};

/// Cursor over the body of a single message
#[derive(Debug, Clone)]
pub struct MessageReader {
    buf: Bytes,
    consumed: usize,
}

impl MessageReader {
    /// Create a reader over a message body
    pub fn new(buf: Bytes) -> Self {
        Self { buf, consumed: 0 }
    }

    /// Bytes not yet consumed
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Bytes consumed so far
    #[inline]
    pub fn position(&self) -> usize {
        self.consumed
    }

    fn ensure(&self, need: usize, context: &str) -> ProtocolResult<()> {
        if self.buf.remaining() < need {
            return Err(ProtocolError::message_too_small(
                need,
                self.buf.remaining(),
                context,
            ));
        }
        Ok(())
    }

    pub fn read_u8(&mut self, context: &str) -> ProtocolResult<u8> {
        self.ensure(1, context)?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    /// Read an optional trailing byte, `None` when the message has ended
    pub fn read_optional_u8(&mut self) -> Option<u8> {
        if self.buf.has_remaining() {
            self.consumed += 1;
            Some(self.buf.get_u8())
        } else {
            None
        }
    }

    pub fn read_u16(&mut self, context: &str) -> ProtocolResult<u16> {
        self.ensure(2, context)?;
        self.consumed += 2;
        Ok(self.buf.get_u16())
    }

    pub fn read_i32(&mut self, context: &str) -> ProtocolResult<i32> {
        self.ensure(4, context)?;
        self.consumed += 4;
        Ok(self.buf.get_i32())
    }

    /// Read the 2-byte big-endian invocation correlation id
    pub fn read_correlation_id(&mut self) -> ProtocolResult<u16> {
        self.read_u16("correlation id")
    }

    /// Read a packed integer
    pub fn read_packed_int(&mut self) -> ProtocolResult<i32> {
        let before = self.buf.remaining();
        let value = packed::get_packed_int(&mut self.buf)?;
        self.consumed += before - self.buf.remaining();
        Ok(value)
    }

    /// Read a packed count of items that occupy at least one byte each
    pub fn read_packed_len(&mut self, context: &str) -> ProtocolResult<usize> {
        let len = self.read_packed_int()? as usize;
        if len > self.remaining() {
            return Err(ProtocolError::message_too_small(len, self.remaining(), context));
        }
        Ok(len)
    }

    /// Read a string with a 2-byte big-endian length prefix
    pub fn read_utf(&mut self, context: &str) -> ProtocolResult<String> {
        let len = self.read_u16(context)? as usize;
        let raw = self.read_bytes(len, context)?;
        String::from_utf8(raw.to_vec()).map_err(|e| ProtocolError::invalid_utf8(context, e))
    }

    /// Split off exactly `len` bytes without copying
    pub fn read_bytes(&mut self, len: usize, context: &str) -> ProtocolResult<Bytes> {
        self.ensure(len, context)?;
        self.consumed += len;
        Ok(self.buf.split_to(len))
    }

    /// Take everything that is left
    pub fn read_remaining(&mut self) -> Bytes {
        let rest = self.buf.split_to(self.buf.remaining());
        self.consumed += rest.len();
        rest
    }

    /// Borrow the unread bytes as a `Buf` for incremental decoders
    pub fn as_buf(&mut self) -> TrackedBuf<'_> {
        TrackedBuf { reader: self }
    }
}

/// `Buf` view over a [`MessageReader`] that keeps its position in step
pub struct TrackedBuf<'a> {
    reader: &'a mut MessageReader,
}

impl Buf for TrackedBuf<'_> {
    fn remaining(&self) -> usize {
        self.reader.buf.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.reader.buf.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.reader.buf.advance(cnt);
        self.reader.consumed += cnt;
    }
}
