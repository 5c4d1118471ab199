//! Protocol channel receiver
//!
//! One receiver runs per channel after the version handshake. It reads
//! messages until the peer goes away or the association is closed, and
//! dispatches each one through the handler registry of the negotiated
//! version.
//!
//! Error policy of the loop:
//! - framing errors (empty, truncated, undecodable) drop only that message
//! - an unknown header tag closes the channel without writing anything
//! - end of stream or a failed read ends the loop
//!
//! Module availability changes published by the deployment repository are
//! forwarded to the client by a companion task for as long as the
//! association stays open. It runs apart from the loop because a
//! transport read must not be interrupted half way through a frame.
//!
//! When the loop ends the association is closed and every invocation still
//! outstanding on the channel is cancelled.

use crate::association::ChannelAssociation;
use crate::cancellation::CancellationRegistry;
use crate::context::ServerContext;
use crate::deployment::{DeploymentRepository, ModuleEvent};
use crate::marshalling::Marshaller;
use crate::model::ModuleIdentifier;
use crate::registry::HandlerRegistry;
use crate::transport::MessageSource;
use crate::{RemotingError, Result};
use bytes::Bytes;
use codec::{describe_tag, HeaderTag, InboundMessage, MessageWriter};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, trace, warn};

/// Read side of one channel
pub struct ChannelReceiver {
    association: Arc<ChannelAssociation>,
    registry: HandlerRegistry,
    context: Arc<ServerContext>,
    marshaller: Arc<dyn Marshaller>,
    cancellations: Arc<CancellationRegistry>,
}

impl ChannelReceiver {
    /// Build the receiver for a negotiated protocol version
    pub fn new(
        association: Arc<ChannelAssociation>,
        version: u8,
        marshaller: Arc<dyn Marshaller>,
        context: Arc<ServerContext>,
    ) -> Result<Self> {
        Ok(Self::with_registry(
            association,
            HandlerRegistry::for_version(version)?,
            marshaller,
            context,
        ))
    }

    /// Build a receiver around a custom handler chain
    pub fn with_registry(
        association: Arc<ChannelAssociation>,
        registry: HandlerRegistry,
        marshaller: Arc<dyn Marshaller>,
        context: Arc<ServerContext>,
    ) -> Self {
        Self {
            association,
            registry,
            context,
            marshaller,
            cancellations: CancellationRegistry::new(),
        }
    }

    pub fn association(&self) -> &Arc<ChannelAssociation> {
        &self.association
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn marshaller(&self) -> &Arc<dyn Marshaller> {
        &self.marshaller
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    pub fn version(&self) -> u8 {
        self.registry.version()
    }

    /// Route one complete message to its handler
    ///
    /// Returns [`RemotingError::UnrecognizedHeader`] when no table in the
    /// chain knows the tag.
    pub fn dispatch(&self, message: Bytes) -> Result<()> {
        let message = InboundMessage::parse(message)?;
        let tag = message.tag();

        let (table_version, handler) =
            self.registry
                .lookup(tag)
                .ok_or(RemotingError::UnrecognizedHeader {
                    tag,
                    version: self.version(),
                })?;

        trace!(
            peer = %self.association.peer(),
            header = %describe_tag(tag),
            table_version,
            bytes = message.body().len(),
            "Dispatching message"
        );
        handler.process_message(self, message.into_body())
    }

    /// Tell the client which modules are deployed
    pub async fn announce_modules(&self) -> Result<()> {
        let modules = self.context.deployments().modules();
        send_modules(&self.association, HeaderTag::ModuleAvailable, &modules).await
    }

    /// Forward one availability change to the client
    pub async fn forward_module_event(&self, event: &ModuleEvent) -> Result<()> {
        send_module_event(&self.association, event).await
    }

    /// Run the read loop until the channel ends
    pub async fn run(self, mut source: Box<dyn MessageSource>) {
        let peer = self.association.peer().to_string();
        info!(peer = %peer, version = self.version(), "Channel receiver started");

        // Subscribe first so no change between announcement and loop is lost
        let module_events = self.context.deployments().subscribe();
        if let Err(e) = self.announce_modules().await {
            warn!(peer = %peer, error = %e, "Failed to announce modules");
            self.shutdown().await;
            return;
        }
        let forwarder = tokio::spawn(forward_module_events(
            self.association.clone(),
            self.context.deployments().clone(),
            module_events,
        ));

        let mut received: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.association.closed() => {
                    debug!(peer = %peer, "Association closed, stopping receiver");
                    break;
                }
                next = source.read_message() => next,
            };

            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!(peer = %peer, "Peer closed the channel");
                    break;
                }
                Err(e) if e.is_fatal_to_channel() => {
                    warn!(peer = %peer, error = %e, "Channel read failed");
                    break;
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Dropping unreadable message");
                    continue;
                }
            };
            received += 1;

            match self.dispatch(message) {
                Ok(()) => {}
                Err(e) if e.is_fatal_to_channel() => {
                    warn!(peer = %peer, error = %e, "Protocol violation, closing channel");
                    break;
                }
                Err(e) => {
                    warn!(
                        peer = %peer,
                        error = %e,
                        category = e.category(),
                        "Dropping message"
                    );
                }
            }
        }

        self.shutdown().await;
        if let Err(e) = forwarder.await {
            warn!(peer = %peer, error = %e, "Module event forwarder failed");
        }
        info!(peer = %peer, messages = received, "Channel receiver stopped");
    }

    async fn shutdown(&self) {
        self.association.close().await;
        let cancelled = self.cancellations.cancel_all();
        if cancelled > 0 {
            debug!(
                peer = %self.association.peer(),
                cancelled,
                "Cancelled outstanding invocations"
            );
        }
    }
}

async fn send_modules(
    association: &ChannelAssociation,
    tag: HeaderTag,
    modules: &[ModuleIdentifier],
) -> Result<()> {
    let mut message = MessageWriter::with_header(tag);
    message.put_packed_len(modules.len())?;
    for module in modules {
        message
            .put_utf(&module.app_name)?
            .put_utf(&module.module_name)?
            .put_utf(&module.distinct_name)?;
    }

    let mut out = association.acquire_output_stream().await?;
    std::io::Write::write_all(&mut out, message.as_slice())?;
    out.send().await?;

    debug!(
        peer = %association.peer(),
        header = %tag,
        modules = modules.len(),
        "Sent module availability"
    );
    Ok(())
}

async fn send_module_event(association: &ChannelAssociation, event: &ModuleEvent) -> Result<()> {
    match event {
        ModuleEvent::Available(modules) => {
            send_modules(association, HeaderTag::ModuleAvailable, modules).await
        }
        ModuleEvent::Unavailable(modules) => {
            send_modules(association, HeaderTag::ModuleUnavailable, modules).await
        }
    }
}

/// Relay repository events until the association closes
async fn forward_module_events(
    association: Arc<ChannelAssociation>,
    deployments: Arc<dyn DeploymentRepository>,
    mut events: broadcast::Receiver<ModuleEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = association.closed() => break,
            event = events.recv() => event,
        };

        let sent = match event {
            Ok(event) => send_module_event(&association, &event).await,
            Err(RecvError::Lagged(missed)) => {
                debug!(peer = %association.peer(), missed, "Module events lagged, re-announcing");
                let modules = deployments.modules();
                send_modules(&association, HeaderTag::ModuleAvailable, &modules).await
            }
            Err(RecvError::Closed) => break,
        };

        if let Err(e) = sent {
            if !association.is_closed() {
                warn!(peer = %association.peer(), error = %e, "Failed to send module availability, closing channel");
                association.close().await;
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{BeanDescriptor, FnBean, InMemoryDeploymentRepository};
    use crate::executor::{WorkerPool, WorkerPoolConfig};
    use crate::model::{EjbLocator, Value};
    use crate::marshalling::BincodeMarshaller;
    use crate::transaction::InMemoryTransactionLog;
    use crate::transport::{pipe, Channel};
    use codec::{MessageReader, ProtocolError};

    fn context() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(
            Arc::new(InMemoryDeploymentRepository::new()),
            Arc::new(InMemoryTransactionLog::new()),
            WorkerPool::new(&WorkerPoolConfig::default()),
        ))
    }

    fn receiver(version: u8) -> (ChannelReceiver, Box<dyn MessageSource>, Channel) {
        let (server, client) = pipe(16);
        let association = Arc::new(ChannelAssociation::new(server.sink, server.peer));
        let receiver = ChannelReceiver::new(
            association,
            version,
            Arc::new(BincodeMarshaller::new()),
            context(),
        )
        .unwrap();
        (receiver, server.source, client)
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let (receiver, _source, _client) = receiver(2);

        assert!(matches!(
            receiver.dispatch(Bytes::new()),
            Err(RemotingError::Protocol(ProtocolError::EmptyMessage))
        ));
        assert!(matches!(
            receiver.dispatch(Bytes::from_static(&[0xFF])),
            Err(RemotingError::UnrecognizedHeader { tag: 0xFF, version: 2 })
        ));
        // Invocation without a full correlation id
        let err = receiver
            .dispatch(Bytes::from_static(&[0x03, 0x00]))
            .unwrap_err();
        assert!(!err.is_fatal_to_channel());
    }

    #[tokio::test]
    async fn test_announce_modules_with_nothing_deployed() {
        let (receiver, _source, mut client) = receiver(1);
        receiver.announce_modules().await.unwrap();

        let message = client.source.read_message().await.unwrap().unwrap();
        let mut reader = MessageReader::new(message);
        assert_eq!(reader.read_u8("tag").unwrap(), 0x08);
        assert_eq!(reader.read_packed_len("modules").unwrap(), 0);
        assert_eq!(reader.remaining(), 0);
    }

    #[tokio::test]
    async fn test_run_ends_when_peer_disconnects() {
        let (receiver, source, client) = receiver(2);
        let association = receiver.association().clone();
        let Channel {
            source: mut client_source,
            sink: client_sink,
            ..
        } = client;
        drop(client_sink);

        receiver.run(source).await;
        assert!(association.is_closed());

        // Announcement, then end of stream
        let announcement = client_source.read_message().await.unwrap().unwrap();
        assert_eq!(announcement[0], 0x08);
        assert!(client_source.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_closes_on_unknown_tag() {
        let (receiver, source, mut client) = receiver(2);
        let association = receiver.association().clone();

        client.sink.write_message(&[0xFF, 0x00, 0x01]).await.unwrap();
        receiver.run(source).await;
        assert!(association.is_closed());

        let announcement = client.source.read_message().await.unwrap().unwrap();
        assert_eq!(announcement[0], 0x08);
        assert!(client.source.read_message().await.unwrap().is_none());
    }

    fn read_modules(message: Bytes) -> (u8, Vec<ModuleIdentifier>) {
        let mut reader = MessageReader::new(message);
        let tag = reader.read_u8("tag").unwrap();
        let count = reader.read_packed_len("modules").unwrap();
        let modules = (0..count)
            .map(|_| {
                ModuleIdentifier::new(
                    reader.read_utf("app").unwrap(),
                    reader.read_utf("module").unwrap(),
                    reader.read_utf("distinct").unwrap(),
                )
            })
            .collect();
        (tag, modules)
    }

    #[tokio::test]
    async fn test_module_changes_reach_the_client() {
        let shop = ModuleIdentifier::new("shop", "ejb", "");
        let billing = ModuleIdentifier::new("billing", "ejb", "");
        let cart = EjbLocator::new(shop.clone(), "Cart");

        let repo = Arc::new(InMemoryDeploymentRepository::new());
        repo.deploy(BeanDescriptor::new(cart.clone()), FnBean::new(|_, _, _| Ok(Value::Null)))
            .unwrap();
        let context = Arc::new(ServerContext::new(
            repo.clone(),
            Arc::new(InMemoryTransactionLog::new()),
            WorkerPool::new(&WorkerPoolConfig::default()),
        ));

        let (server, mut client) = pipe(16);
        let association = Arc::new(ChannelAssociation::new(server.sink, server.peer));
        let receiver =
            ChannelReceiver::new(association, 2, Arc::new(BincodeMarshaller::new()), context)
                .unwrap();
        let running = tokio::spawn(receiver.run(server.source));

        let message = client.source.read_message().await.unwrap().unwrap();
        assert_eq!(read_modules(message), (0x08, vec![shop.clone()]));

        assert!(repo.undeploy(&cart));
        let message = client.source.read_message().await.unwrap().unwrap();
        assert_eq!(read_modules(message), (0x09, vec![shop]));

        repo.deploy(
            BeanDescriptor::new(EjbLocator::new(billing.clone(), "Invoices")),
            FnBean::new(|_, _, _| Ok(Value::Null)),
        )
        .unwrap();
        let message = client.source.read_message().await.unwrap().unwrap();
        assert_eq!(read_modules(message), (0x08, vec![billing]));

        drop(client.sink);
        tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
    }
}
