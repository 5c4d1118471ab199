//! Session open handler
//!
//! Body: correlation id, then the marshalled locator of a stateful bean. The
//! answer carries the marshalled id of the new session.

use super::{
    correlated, failure_message, no_such_ejb, not_stateful, respond, respond_or_fail, unavailable,
    MessageHandler,
};
use crate::deployment::InvocationError;
use crate::marshalling::MarshallerExt;
use crate::model::RemoteFailure;
use crate::receiver::ChannelReceiver;
use crate::Result;
use bytes::Bytes;
use codec::{HeaderTag, MessageReader};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOpenHandler;

impl MessageHandler for SessionOpenHandler {
    fn process_message(&self, receiver: &ChannelReceiver, body: Bytes) -> Result<()> {
        let mut reader = MessageReader::new(body);
        let id = reader.read_correlation_id()?;

        let association = receiver.association().clone();
        let marshaller = receiver.marshaller().clone();
        let workers = receiver.context().workers().clone();

        let locator = match marshaller.read_locator(&mut reader) {
            Ok(locator) => locator,
            Err(e) => {
                warn!(correlation_id = id, error = %e, "Failed to unmarshal session open request");
                let failure = RemoteFailure::new("java.io.InvalidObjectException", e.to_string());
                let message = failure_message(marshaller.as_ref(), id, failure)?;
                workers.submit(async move { respond(&association, message.as_slice(), None).await });
                return Ok(());
            }
        };

        let Some(deployed) = receiver.context().deployments().find_bean(&locator) else {
            let message = no_such_ejb(id, &locator)?;
            workers.submit(async move { respond(&association, message.as_slice(), None).await });
            return Ok(());
        };

        if !deployed.bean().is_stateful() {
            let message = not_stateful(id, &locator)?;
            workers.submit(async move { respond(&association, message.as_slice(), None).await });
            return Ok(());
        }

        let task_workers = workers.clone();
        workers.submit(async move {
            let result = task_workers.run(move || deployed.bean().open_session()).await;

            let message = match result {
                Ok(Ok(session)) => {
                    debug!(correlation_id = id, bean = %locator, "Session opened");
                    let mut out = correlated(HeaderTag::SessionOpenResponse, id);
                    marshaller.write_session_id(session, &mut out).map(|()| out)
                }
                Ok(Err(InvocationError::Unavailable(reason))) => unavailable(id, &reason),
                Ok(Err(InvocationError::Application(failure))) => {
                    failure_message(marshaller.as_ref(), id, failure)
                }
                Ok(Err(e)) => failure_message(
                    marshaller.as_ref(),
                    id,
                    RemoteFailure::new("javax.ejb.EJBException", e.to_string()),
                ),
                Err(e) => failure_message(
                    marshaller.as_ref(),
                    id,
                    RemoteFailure::new("javax.ejb.EJBException", e.to_string()),
                ),
            };

            respond_or_fail(&association, marshaller.as_ref(), id, message, None).await;
        });
        Ok(())
    }
}
