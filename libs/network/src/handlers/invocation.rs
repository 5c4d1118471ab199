//! Method invocation handler
//!
//! Body: correlation id, then the marshalled invocation request. The bean and
//! method are resolved on the read loop so that unknown targets are answered
//! immediately; the call itself runs on the worker pool.
//!
//! Version one answers uncompressed. Version two reinterprets the same tag:
//! when the method's compression hint asks for it, the success response is
//! written behind the compressed-message sub-header.

use super::{
    cancelled, correlated, failure_message, no_such_ejb, no_such_method, respond, respond_or_fail,
    unavailable, MessageHandler,
};
use crate::association::ChannelAssociation;
use crate::cancellation::CancellationFlag;
use crate::deployment::{DeployedBean, InvocationContext, InvocationError};
use crate::marshalling::{Marshaller, MarshallerExt};
use crate::model::{InvocationRequest, InvocationResponse, RemoteFailure};
use crate::receiver::ChannelReceiver;
use crate::{RemotingError, Result};
use bytes::Bytes;
use codec::{CompressionLevel, HeaderTag, MessageReader, MessageWriter};
use std::sync::Arc;
use tracing::{debug, warn};

/// How an invocation ended on the worker
#[derive(Debug)]
enum Outcome {
    Returned(InvocationResponse),
    Failed(RemoteFailure),
    Unavailable(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct InvocationHandler {
    compression_capable: bool,
}

impl InvocationHandler {
    /// Version one behaviour: responses are never compressed
    pub fn uncompressed() -> Self {
        Self {
            compression_capable: false,
        }
    }

    /// Version two behaviour: responses follow the method's compression hint
    pub fn compression_capable() -> Self {
        Self {
            compression_capable: true,
        }
    }
}

impl MessageHandler for InvocationHandler {
    fn process_message(&self, receiver: &ChannelReceiver, body: Bytes) -> Result<()> {
        let mut reader = MessageReader::new(body);
        let id = reader.read_correlation_id()?;

        let association = receiver.association().clone();
        let marshaller = receiver.marshaller().clone();
        let context = receiver.context();
        let workers = context.workers().clone();

        let request = match marshaller.read_invocation(&mut reader) {
            Ok(request) => request,
            Err(e) => {
                warn!(correlation_id = id, error = %e, "Failed to unmarshal invocation request");
                let failure = RemoteFailure::new("java.io.InvalidObjectException", e.to_string());
                let message = failure_message(marshaller.as_ref(), id, failure)?;
                workers.submit(async move { respond(&association, message.as_slice(), None).await });
                return Ok(());
            }
        };

        let Some(bean) = context.deployments().find_bean(&request.locator) else {
            debug!(correlation_id = id, bean = %request.locator, "No such EJB");
            let message = no_such_ejb(id, &request.locator)?;
            workers.submit(async move { respond(&association, message.as_slice(), None).await });
            return Ok(());
        };

        let Some(hint) = bean.method_hint(&request.method) else {
            debug!(correlation_id = id, method = %request.method, "No such method");
            let message = no_such_method(id, &request.locator, &request.method)?;
            workers.submit(async move { respond(&association, message.as_slice(), None).await });
            return Ok(());
        };

        let registration = match receiver.cancellations().register(id) {
            Ok(registration) => registration,
            Err(e @ RemotingError::DuplicateCorrelationId { .. }) => {
                warn!(correlation_id = id, "Duplicate correlation id");
                let failure = RemoteFailure::new("java.lang.IllegalStateException", e.to_string());
                let message = failure_message(marshaller.as_ref(), id, failure)?;
                workers.submit(async move { respond(&association, message.as_slice(), None).await });
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let compression = if self.compression_capable {
            hint.response_level()
        } else {
            None
        };

        debug!(
            correlation_id = id,
            bean = %request.locator,
            method = %request.method,
            compressed = compression.is_some(),
            "Dispatching invocation"
        );

        let task_workers = workers.clone();
        workers.submit(async move {
            let flag = registration.flag().clone();
            let outcome = match task_workers.run(move || execute(&bean, request, flag)).await {
                Ok(outcome) => outcome,
                Err(e) => Outcome::Failed(RemoteFailure::new("javax.ejb.EJBException", e.to_string())),
            };

            write_outcome(&association, marshaller.as_ref(), id, outcome, compression).await;
            drop(registration);
        });
        Ok(())
    }
}

/// Worker side of an invocation
fn execute(bean: &DeployedBean, request: InvocationRequest, flag: Arc<CancellationFlag>) -> Outcome {
    if !flag.run_if_not_cancelled() {
        return Outcome::Cancelled;
    }

    let mut context = InvocationContext::new(flag, request.attachments);
    match bean.bean().invoke(&request.method, request.arguments, &mut context) {
        Ok(value) => Outcome::Returned(InvocationResponse {
            value,
            attachments: context.into_response_attachments(),
        }),
        Err(InvocationError::Application(failure)) => Outcome::Failed(failure),
        Err(InvocationError::Unavailable(reason)) => Outcome::Unavailable(reason),
        Err(InvocationError::Cancelled) => Outcome::Cancelled,
    }
}

async fn write_outcome(
    association: &ChannelAssociation,
    marshaller: &dyn Marshaller,
    id: u16,
    outcome: Outcome,
    compression: Option<CompressionLevel>,
) {
    let (message, compression) = match outcome {
        Outcome::Returned(response) => (response_message(marshaller, id, response), compression),
        Outcome::Failed(failure) => (failure_message(marshaller, id, failure), None),
        Outcome::Unavailable(reason) => (unavailable(id, &reason), None),
        Outcome::Cancelled => {
            debug!(correlation_id = id, "Invocation cancelled");
            (Ok(cancelled(id)), None)
        }
    };
    respond_or_fail(association, marshaller, id, message, compression).await;
}

fn response_message(
    marshaller: &dyn Marshaller,
    id: u16,
    response: InvocationResponse,
) -> Result<MessageWriter> {
    let mut out = correlated(HeaderTag::InvocationResponse, id);
    marshaller.write_response(response, &mut out)?;
    Ok(out)
}
