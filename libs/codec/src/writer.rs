//! Message writer
//!
//! Builds message bytes into a `BytesMut`. Used both for complete messages
//! (tag first) and for response bodies that are computed before the channel's
//! output stream is acquired.

use crate::error::{ProtocolError, ProtocolResult};
use crate::header::HeaderTag;
use crate::packed;
use bytes::{BufMut, Bytes, BytesMut};

/// Growable buffer with protocol-aware put methods
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Start a message with its header tag
    pub fn with_header(tag: HeaderTag) -> Self {
        let mut writer = Self::with_capacity(64);
        writer.put_header(tag);
        writer
    }

    pub fn put_header(&mut self, tag: HeaderTag) -> &mut Self {
        self.buf.put_u8(tag.byte());
        self
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_correlation_id(&mut self, id: u16) -> &mut Self {
        self.buf.put_u16(id);
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    pub fn put_packed_len(&mut self, len: usize) -> ProtocolResult<&mut Self> {
        packed::put_packed_len(&mut self.buf, len)?;
        Ok(self)
    }

    /// Write a string with a 2-byte big-endian length prefix
    pub fn put_utf(&mut self, value: &str) -> ProtocolResult<&mut Self> {
        let len = u16::try_from(value.len())
            .map_err(|_| ProtocolError::StringTooLong { len: value.len() })?;
        self.buf.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(self)
    }

    pub fn put_slice(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Mutable access for encoders that write straight into the buffer
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl std::io::Write for MessageWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.put_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_response_layout() {
        let mut writer = MessageWriter::with_header(HeaderTag::TxRecoverResponse);
        writer.put_correlation_id(0x0102);
        writer.put_packed_len(0).unwrap();

        assert_eq!(writer.as_slice(), &[0x1A, 0x01, 0x02, 0x00]);
    }

    #[test]
    fn test_utf_prefix() {
        let mut writer = MessageWriter::new();
        writer.put_utf("node-1").unwrap();
        assert_eq!(&writer.as_slice()[..2], &[0x00, 0x06]);
        assert_eq!(&writer.as_slice()[2..], b"node-1");
    }

    #[test]
    fn test_utf_too_long() {
        let mut writer = MessageWriter::new();
        let long = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            writer.put_utf(&long),
            Err(ProtocolError::StringTooLong { .. })
        ));
    }
}
