//! Inbound message framing
//!
//! A message is the payload of one transport frame. Its first byte is the
//! header tag; the rest is the body handed to the tag's handler.

use crate::error::{ProtocolError, ProtocolResult};
use crate::header::{describe_tag, HeaderTag};
use crate::reader::MessageReader;
use bytes::Bytes;

/// One complete inbound message, split into tag and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    tag: u8,
    body: Bytes,
}

impl InboundMessage {
    /// Peel the header tag off a raw message
    pub fn parse(mut raw: Bytes) -> ProtocolResult<Self> {
        if raw.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        let body = raw.split_off(1);
        Ok(Self { tag: raw[0], body })
    }

    #[inline]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Named tag, if the byte is part of the protocol
    pub fn header(&self) -> Option<HeaderTag> {
        HeaderTag::from_byte(self.tag)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Reader positioned at the start of the body
    pub fn reader(&self) -> MessageReader {
        MessageReader::new(self.body.clone())
    }

    pub fn describe(&self) -> String {
        describe_tag(self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_tag() {
        let msg = InboundMessage::parse(Bytes::from_static(&[0x03, 0x00, 0x07, 0xAA])).unwrap();
        assert_eq!(msg.tag(), 0x03);
        assert_eq!(msg.header(), Some(HeaderTag::InvocationRequest));
        assert_eq!(msg.body().as_ref(), &[0x00, 0x07, 0xAA]);

        let mut reader = msg.reader();
        assert_eq!(reader.read_correlation_id().unwrap(), 7);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(
            InboundMessage::parse(Bytes::new()),
            Err(ProtocolError::EmptyMessage)
        );
    }

    #[test]
    fn test_tag_only_message() {
        let msg = InboundMessage::parse(Bytes::from_static(&[0xFF])).unwrap();
        assert_eq!(msg.header(), None);
        assert!(msg.body().is_empty());
    }
}
