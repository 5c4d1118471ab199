//! Protocol message handlers
//!
//! A handler is bound to one header tag in one protocol version's table. It
//! parses the framing of the message body on the read-loop task, then hands
//! any blocking work to the worker pool together with whatever the response
//! writer needs. Handlers are stateless; everything shared comes from the
//! [`ChannelReceiver`] they are dispatched from.

use crate::association::ChannelAssociation;
use crate::marshalling::{Marshaller, MarshallerExt};
use crate::model::{EjbLocator, MethodLocator, RemoteFailure};
use crate::receiver::ChannelReceiver;
use crate::Result;
use bytes::Bytes;
use codec::{deflate_writer, CompressionLevel, HeaderTag, MessageWriter};
use std::io::Write;
use tracing::{trace, warn};

pub mod cancel;
pub mod compressed;
pub mod invocation;
pub mod recovery;
pub mod session;

pub use cancel::InvocationCancelHandler;
pub use compressed::CompressedMessageHandler;
pub use invocation::InvocationHandler;
pub use recovery::TxRecoverHandler;
pub use session::SessionOpenHandler;

/// Strategy for one kind of inbound message
pub trait MessageHandler: Send + Sync {
    /// Handle a message whose header tag has already been consumed
    ///
    /// Errors are logged by the receiver; protocol errors drop only this
    /// message, anything fatal to the channel closes it.
    fn process_message(&self, receiver: &ChannelReceiver, body: Bytes) -> Result<()>;
}

/// Start a response carrying `id`
pub(crate) fn correlated(tag: HeaderTag, id: u16) -> MessageWriter {
    let mut out = MessageWriter::with_capacity(64);
    out.put_header(tag).put_correlation_id(id);
    out
}

/// Invocation failure carrying a marshalled [`RemoteFailure`]
pub(crate) fn failure_message(
    marshaller: &dyn Marshaller,
    id: u16,
    failure: RemoteFailure,
) -> Result<MessageWriter> {
    let mut out = correlated(HeaderTag::InvocationFailure, id);
    marshaller.write_failure(failure, &mut out)?;
    Ok(out)
}

pub(crate) fn no_such_ejb(id: u16, locator: &EjbLocator) -> Result<MessageWriter> {
    let mut out = correlated(HeaderTag::NoSuchEjb, id);
    out.put_utf(&format!("No such EJB: {}", locator))?;
    Ok(out)
}

pub(crate) fn no_such_method(
    id: u16,
    locator: &EjbLocator,
    method: &MethodLocator,
) -> Result<MessageWriter> {
    let mut out = correlated(HeaderTag::NoSuchMethod, id);
    out.put_utf(&format!("No such method {} on EJB {}", method, locator))?;
    Ok(out)
}

pub(crate) fn not_stateful(id: u16, locator: &EjbLocator) -> Result<MessageWriter> {
    let mut out = correlated(HeaderTag::EjbNotStateful, id);
    out.put_utf(&format!("EJB {} is not stateful", locator))?;
    Ok(out)
}

/// A deployed bean that cannot take calls is reported like a missing one
pub(crate) fn unavailable(id: u16, reason: &str) -> Result<MessageWriter> {
    let mut out = correlated(HeaderTag::NoSuchEjb, id);
    out.put_utf(reason)?;
    Ok(out)
}

pub(crate) fn cancelled(id: u16) -> MessageWriter {
    correlated(HeaderTag::InvocationCancelled, id)
}

/// Write one complete message under the output lock
///
/// With a compression level the message goes out as the `0x1B` sub-header
/// followed by a raw DEFLATE stream of the whole message.
pub(crate) async fn send_message(
    association: &ChannelAssociation,
    message: &[u8],
    compression: Option<CompressionLevel>,
) -> Result<()> {
    let mut out = association.acquire_output_stream().await?;
    match compression {
        Some(level) => {
            out.write_all(&[HeaderTag::CompressedMessage.byte()])?;
            let mut encoder = deflate_writer(&mut out, level);
            encoder.write_all(message)?;
            encoder.finish()?;
            trace!(
                original = message.len(),
                compressed = out.len(),
                level = level.value(),
                "Compressed response"
            );
        }
        None => out.write_all(message)?,
    }
    out.send().await
}

/// [`send_message`], closing the channel if the write fails
pub(crate) async fn respond(
    association: &ChannelAssociation,
    message: &[u8],
    compression: Option<CompressionLevel>,
) {
    if let Err(e) = send_message(association, message, compression).await {
        warn!(
            peer = %association.peer(),
            error = %e,
            "Failed to write response, closing channel"
        );
        association.close().await;
    }
}

/// Send a built response, falling back to a failure for the same id when
/// the response itself could not be built
pub(crate) async fn respond_or_fail(
    association: &ChannelAssociation,
    marshaller: &dyn Marshaller,
    id: u16,
    message: Result<MessageWriter>,
    compression: Option<CompressionLevel>,
) {
    match message {
        Ok(message) => respond(association, message.as_slice(), compression).await,
        Err(e) => {
            warn!(correlation_id = id, error = %e, "Failed to build response");
            let failure = RemoteFailure::new("java.io.NotSerializableException", e.to_string());
            match failure_message(marshaller, id, failure) {
                Ok(message) => respond(association, message.as_slice(), None).await,
                Err(e) => {
                    warn!(correlation_id = id, error = %e, "Failed to build failure response, closing channel");
                    association.close().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshalling::BincodeMarshaller;
    use crate::transport::pipe;
    use codec::{inflate, MessageReader, DEFAULT_MAX_INFLATED_SIZE};

    #[tokio::test]
    async fn test_compressed_send_wraps_whole_message() {
        let (server, mut client) = pipe(4);
        let association = ChannelAssociation::new(server.sink, server.peer);

        let message = correlated(HeaderTag::InvocationResponse, 7);
        send_message(&association, message.as_slice(), Some(CompressionLevel::DEFAULT))
            .await
            .unwrap();

        let wire = client.source.read_message().await.unwrap().unwrap();
        assert_eq!(wire[0], 0x1B);
        let inner = inflate(&wire[1..], DEFAULT_MAX_INFLATED_SIZE).unwrap();
        assert_eq!(inner, vec![0x05, 0x00, 0x07]);
    }

    #[tokio::test]
    async fn test_failed_write_closes_association() {
        let (server, client) = pipe(4);
        let association = ChannelAssociation::new(server.sink, server.peer);
        drop(client);

        respond(&association, &[0x05, 0x00, 0x01], None).await;
        assert!(association.is_closed());
    }

    #[test]
    fn test_failure_message_layout() {
        let marshaller = BincodeMarshaller::new();
        let message =
            failure_message(&marshaller, 0x0102, RemoteFailure::new("E", "boom")).unwrap();

        let mut reader = MessageReader::new(message.freeze());
        assert_eq!(reader.read_u8("tag").unwrap(), 0x06);
        assert_eq!(reader.read_correlation_id().unwrap(), 0x0102);
        assert_eq!(
            marshaller.read_failure(&mut reader).unwrap(),
            RemoteFailure::new("E", "boom")
        );
    }
}
