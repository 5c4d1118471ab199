//! Invocation cancel handler
//!
//! Body: correlation id of the invocation to cancel, then an optional flag
//! byte allowing a running invocation to be told about the cancel. Nothing
//! is written back for the cancel itself; the invocation's own response
//! reports the result.

use super::MessageHandler;
use crate::receiver::ChannelReceiver;
use crate::Result;
use bytes::Bytes;
use codec::MessageReader;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct InvocationCancelHandler;

impl MessageHandler for InvocationCancelHandler {
    fn process_message(&self, receiver: &ChannelReceiver, body: Bytes) -> Result<()> {
        let mut reader = MessageReader::new(body);
        let id = reader.read_correlation_id()?;
        let may_interrupt = reader.read_optional_u8().is_some_and(|flag| flag != 0);

        if receiver.cancellations().cancel(id, may_interrupt).is_none() {
            debug!(correlation_id = id, "Cancel for unknown invocation ignored");
        }
        Ok(())
    }
}
