//! Transaction recovery handler
//!
//! Body: correlation id, parent node name (UTF), recovery flags (`i32` BE).
//! The answer lists the in-doubt branches as a packed count followed by the
//! marshalled Xids.

use super::{correlated, failure_message, respond, respond_or_fail, MessageHandler};
use crate::deployment::InvocationError;
use crate::marshalling::{Marshaller, MarshallerExt};
use crate::model::{RemoteFailure, Xid};
use crate::receiver::ChannelReceiver;
use crate::Result;
use bytes::Bytes;
use codec::{HeaderTag, MessageReader, MessageWriter};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct TxRecoverHandler;

impl MessageHandler for TxRecoverHandler {
    fn process_message(&self, receiver: &ChannelReceiver, body: Bytes) -> Result<()> {
        let mut reader = MessageReader::new(body);
        let id = reader.read_correlation_id()?;
        let parent_node = reader.read_utf("parent node name")?;
        let flags = reader.read_i32("recovery flags")?;

        let association = receiver.association().clone();
        let marshaller = receiver.marshaller().clone();
        let recovery = receiver.context().recovery().clone();
        let workers = receiver.context().workers().clone();

        debug!(correlation_id = id, %parent_node, flags, "Transaction recovery requested");

        let task_workers = workers.clone();
        workers.submit(async move {
            let result = task_workers
                .run(move || recovery.recover(&parent_node, flags))
                .await;

            let failure = match result {
                Ok(Ok(xids)) => {
                    let message = recover_response(marshaller.as_ref(), id, &xids);
                    respond_or_fail(&association, marshaller.as_ref(), id, message, None).await;
                    return;
                }
                Ok(Err(InvocationError::Application(failure))) => failure,
                Ok(Err(e)) => RemoteFailure::new("javax.transaction.xa.XAException", e.to_string()),
                Err(e) => RemoteFailure::new("javax.transaction.xa.XAException", e.to_string()),
            };

            warn!(correlation_id = id, failure = %failure, "Transaction recovery failed");
            match failure_message(marshaller.as_ref(), id, failure) {
                Ok(message) => respond(&association, message.as_slice(), None).await,
                Err(e) => {
                    warn!(correlation_id = id, error = %e, "Failed to build failure response, closing channel");
                    association.close().await;
                }
            }
        });
        Ok(())
    }
}

fn recover_response(marshaller: &dyn Marshaller, id: u16, xids: &[Xid]) -> Result<MessageWriter> {
    let mut out = correlated(HeaderTag::TxRecoverResponse, id);
    out.put_packed_len(xids.len())?;
    for xid in xids {
        marshaller.write_xid(xid, &mut out)?;
    }
    Ok(out)
}
