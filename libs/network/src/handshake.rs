//! Version handshake
//!
//! ```text
//! server → client   u8 highest version | packed count | UTF strategy names...
//! client → server   u8 chosen version  | UTF chosen strategy
//! ```
//!
//! Anything the server cannot honour ends the connection before a receiver
//! is built for it.

use crate::association::ChannelAssociation;
use crate::context::ServerContext;
use crate::marshalling::Marshaller;
use crate::transport::{MessageSink, MessageSource};
use crate::{RemotingError, Result};
use codec::{MessageReader, MessageWriter, LATEST_PROTOCOL_VERSION, PROTOCOL_VERSION_ONE};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of a successful handshake
#[derive(Clone)]
pub struct Negotiated {
    pub version: u8,
    pub marshaller: Arc<dyn Marshaller>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("version", &self.version)
            .field("marshaller", &self.marshaller.name())
            .finish()
    }
}

/// Greeting as seen by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGreeting {
    pub version: u8,
    pub marshalling_strategies: Vec<String>,
}

fn greeting(context: &ServerContext) -> Result<MessageWriter> {
    let names = context.marshaller_names();
    let mut out = MessageWriter::new();
    out.put_u8(LATEST_PROTOCOL_VERSION).put_packed_len(names.len())?;
    for name in names {
        out.put_utf(name)?;
    }
    Ok(out)
}

/// Server side: greet, then validate the client's choice
pub async fn server_handshake(
    association: &ChannelAssociation,
    source: &mut dyn MessageSource,
    context: &ServerContext,
    timeout: Duration,
) -> Result<Negotiated> {
    let hello = greeting(context)?;
    let mut out = association.acquire_output_stream().await?;
    out.write_all(hello.as_slice())?;
    out.send().await?;

    let reply = tokio::time::timeout(timeout, source.read_message())
        .await
        .map_err(|_| RemotingError::timeout("version handshake", timeout.as_millis() as u64))??
        .ok_or_else(|| RemotingError::handshake("peer closed the channel during the handshake"))?;

    let mut reader = MessageReader::new(reply);
    let version = reader.read_u8("chosen version")?;
    let strategy = reader.read_utf("chosen marshalling strategy")?;

    if !(PROTOCOL_VERSION_ONE..=LATEST_PROTOCOL_VERSION).contains(&version) {
        return Err(RemotingError::handshake(format!(
            "unsupported protocol version {}",
            version
        )));
    }
    let marshaller = context.marshaller(&strategy).ok_or_else(|| {
        RemotingError::handshake(format!("unsupported marshalling strategy '{}'", strategy))
    })?;

    info!(
        peer = %association.peer(),
        version,
        marshalling = %strategy,
        "Version handshake complete"
    );
    Ok(Negotiated {
        version,
        marshaller,
    })
}

/// Client side: read the greeting and answer with `version` and `strategy`
///
/// Used by test clients and tools; the server never calls it.
pub async fn client_handshake(
    source: &mut dyn MessageSource,
    sink: &mut dyn MessageSink,
    version: u8,
    strategy: &str,
) -> Result<ServerGreeting> {
    let message = source
        .read_message()
        .await?
        .ok_or_else(|| RemotingError::handshake("server closed the channel before greeting"))?;

    let mut reader = MessageReader::new(message);
    let server_version = reader.read_u8("server version")?;
    let count = reader.read_packed_len("strategy count")?;
    let mut marshalling_strategies = Vec::with_capacity(count);
    for _ in 0..count {
        marshalling_strategies.push(reader.read_utf("strategy name")?);
    }
    debug!(server_version, ?marshalling_strategies, "Received server greeting");

    let mut reply = MessageWriter::new();
    reply.put_u8(version).put_utf(strategy)?;
    sink.write_message(reply.as_slice()).await?;

    Ok(ServerGreeting {
        version: server_version,
        marshalling_strategies,
    })
}
