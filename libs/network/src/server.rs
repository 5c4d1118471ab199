//! TCP accept loop
//!
//! Each accepted connection gets its own task: version handshake, then the
//! channel receiver for the negotiated version. On shutdown the listener
//! stops accepting, every open association is closed and the server waits
//! for the receivers to wind down.

use crate::association::ChannelAssociation;
use crate::config::RemotingConfig;
use crate::context::ServerContext;
use crate::handshake::server_handshake;
use crate::receiver::ChannelReceiver;
use crate::transport::{tcp, Channel, MessageSource};
use crate::{RemotingError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Serve one already-connected channel until it ends
pub async fn serve_channel(channel: Channel, context: Arc<ServerContext>, handshake_timeout: Duration) {
    let association = Arc::new(ChannelAssociation::new(channel.sink, channel.peer));
    serve_association(association, channel.source, context, handshake_timeout).await;
}

async fn serve_association(
    association: Arc<ChannelAssociation>,
    mut source: Box<dyn MessageSource>,
    context: Arc<ServerContext>,
    handshake_timeout: Duration,
) {
    let negotiated =
        match server_handshake(&association, source.as_mut(), &context, handshake_timeout).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                warn!(peer = %association.peer(), error = %e, "Version handshake failed");
                association.close().await;
                return;
            }
        };

    match ChannelReceiver::new(
        association.clone(),
        negotiated.version,
        negotiated.marshaller,
        context,
    ) {
        Ok(receiver) => receiver.run(source).await,
        Err(e) => {
            error!(peer = %association.peer(), error = %e, "Failed to build channel receiver");
            association.close().await;
        }
    }
}

/// Bound remoting listener
pub struct RemotingServer {
    listener: TcpListener,
    config: RemotingConfig,
    context: Arc<ServerContext>,
}

impl RemotingServer {
    pub async fn bind(config: RemotingConfig, context: Arc<ServerContext>) -> Result<Self> {
        config.validate()?;
        let address = config.bind_address()?;
        let listener = TcpListener::bind(address).await.map_err(|e| {
            RemotingError::connection_with_source(
                "Failed to bind TCP listener",
                Some(&address.to_string()),
                e,
            )
        })?;

        info!(address = %address, "Remoting server listening");
        Ok(Self {
            listener,
            config,
            context,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let slots = Arc::new(Semaphore::new(self.config.server.max_connections));
        let handshake_timeout = self.config.handshake_timeout();
        let mut connections: Vec<(Arc<ChannelAssociation>, JoinHandle<()>)> = Vec::new();

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&slots).acquire_owned() => permit
                    .map_err(|_| RemotingError::connection("connection limiter closed", None))?,
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let channel = match tcp::channel_from_stream(stream, &self.config.transport) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Failed to set up channel");
                    continue;
                }
            };
            debug!(peer = %peer, "Accepted connection");

            let association = Arc::new(ChannelAssociation::new(channel.sink, channel.peer));
            let context = self.context.clone();
            let task_association = association.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                serve_association(task_association, channel.source, context, handshake_timeout)
                    .await;
            });

            connections.retain(|(_, handle)| !handle.is_finished());
            connections.push((association, handle));
        }

        info!(open = connections.len(), "Remoting server shutting down");
        let mut handles = Vec::with_capacity(connections.len());
        for (association, handle) in connections {
            association.close().await;
            handles.push(handle);
        }
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Connection task failed");
            }
        }
        self.context.workers().shutdown();
        Ok(())
    }
}
