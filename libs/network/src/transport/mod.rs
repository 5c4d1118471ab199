//! Message Transport Layer
//!
//! A transport moves complete messages. The read half ([`MessageSource`]) is
//! owned by the channel's read loop; the write half ([`MessageSink`]) is owned
//! by the [`ChannelAssociation`](crate::association::ChannelAssociation),
//! which serialises access to it.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod memory;
pub mod tcp;

pub use memory::{pipe, MemorySink, MemorySource};
pub use tcp::{TcpMessageSink, TcpMessageSource, TcpNetworkConfig};

/// Read half of a message channel
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next complete message
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. An error that
    /// leaves the stream positioned at the next message boundary is reported
    /// as [`RemotingError::Protocol`](crate::RemotingError::Protocol); any other
    /// error means the stream is unusable.
    async fn read_message(&mut self) -> Result<Option<Bytes>>;
}

/// Write half of a message channel
#[async_trait]
pub trait MessageSink: Send {
    /// Write one complete message
    async fn write_message(&mut self, message: &[u8]) -> Result<()>;

    /// Close the write direction; further writes fail
    async fn shutdown(&mut self) -> Result<()>;
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    /// TCP network transport
    Tcp,
    /// In-process pipe
    Memory,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Tcp => write!(f, "tcp"),
            TransportType::Memory => write!(f, "memory"),
        }
    }
}

/// Both halves of one connection
pub struct Channel {
    pub source: Box<dyn MessageSource>,
    pub sink: Box<dyn MessageSink>,
    pub peer: String,
    pub transport_type: TransportType,
}

impl Channel {
    pub fn new(
        source: Box<dyn MessageSource>,
        sink: Box<dyn MessageSink>,
        peer: impl Into<String>,
        transport_type: TransportType,
    ) -> Self {
        Self {
            source,
            sink,
            peer: peer.into(),
            transport_type,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.peer)
            .field("transport_type", &self.transport_type)
            .finish()
    }
}
