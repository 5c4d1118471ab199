//! Compressed message handler
//!
//! The body after the `0x1B` tag is a raw DEFLATE stream of another complete
//! message, which is dispatched through the same receiver.

use super::MessageHandler;
use crate::receiver::ChannelReceiver;
use crate::Result;
use bytes::Bytes;
use codec::{inflate, HeaderTag, ProtocolError};
use tracing::trace;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompressedMessageHandler;

impl MessageHandler for CompressedMessageHandler {
    fn process_message(&self, receiver: &ChannelReceiver, body: Bytes) -> Result<()> {
        let inflated = inflate(&body, receiver.context().max_inflated_size())?;

        if inflated.first() == Some(&HeaderTag::CompressedMessage.byte()) {
            return Err(ProtocolError::NestedCompression.into());
        }

        trace!(
            compressed = body.len(),
            inflated = inflated.len(),
            "Inflated compressed message"
        );
        receiver.dispatch(Bytes::from(inflated))
    }
}
