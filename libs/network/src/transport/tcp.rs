//! TCP Network Transport Implementation
//!
//! Length-prefixed message framing over a TCP stream: every message is
//! preceded by its size as a 4-byte big-endian integer.

use super::{Channel, MessageSink, MessageSource, TransportType};
use crate::{RemotingError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use codec::{ProtocolError, DEFAULT_MAX_MESSAGE_SIZE, FRAME_LENGTH_PREFIX};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// TCP network transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpNetworkConfig {
    /// Maximum message size
    pub max_message_size: usize,
    /// Buffer size for reading
    pub buffer_size: usize,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// Connection timeout for client connects
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
}

impl Default for TcpNetworkConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            buffer_size: 64 * 1024, // 64KB
            nodelay: true,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Split an accepted or connected stream into a framed channel
pub fn channel_from_stream(stream: TcpStream, config: &TcpNetworkConfig) -> Result<Channel> {
    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
    }

    let peer_addr = stream
        .peer_addr()
        .map_err(|e| RemotingError::connection_with_source("Failed to get peer address", None, e))?;
    let (read_half, write_half) = stream.into_split();

    Ok(Channel::new(
        Box::new(TcpMessageSource::new(read_half, peer_addr, config)),
        Box::new(TcpMessageSink::new(write_half, peer_addr, config)),
        peer_addr.to_string(),
        TransportType::Tcp,
    ))
}

/// Connect to a remoting server
pub async fn connect(remote: SocketAddr, config: &TcpNetworkConfig) -> Result<Channel> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(remote))
        .await
        .map_err(|_| {
            RemotingError::timeout("TCP connect", config.connect_timeout.as_millis() as u64)
        })?
        .map_err(|e| {
            RemotingError::connection_with_source(
                "Failed to connect to TCP peer",
                Some(&remote.to_string()),
                e,
            )
        })?;

    channel_from_stream(stream, config)
}

/// Read half: yields one length-delimited message per call
pub struct TcpMessageSource {
    stream: OwnedReadHalf,
    peer_addr: SocketAddr,
    max_message_size: usize,
    /// Reusable read buffer
    read_buffer: BytesMut,
    bytes_received: u64,
}

impl TcpMessageSource {
    pub(crate) fn new(stream: OwnedReadHalf, peer_addr: SocketAddr, config: &TcpNetworkConfig) -> Self {
        Self {
            stream,
            peer_addr,
            max_message_size: config.max_message_size,
            read_buffer: BytesMut::with_capacity(config.buffer_size),
            bytes_received: 0,
        }
    }

    /// Drop an oversized message so the stream stays on a frame boundary
    async fn discard(&mut self, len: usize) -> Result<()> {
        let mut limited = (&mut self.stream).take(len as u64);
        let skipped = tokio::io::copy(&mut limited, &mut tokio::io::sink())
            .await
            .map_err(|e| RemotingError::io("Failed to skip oversized message", e))?;
        if skipped < len as u64 {
            return Err(RemotingError::connection(
                "Stream ended inside oversized message",
                Some(&self.peer_addr.to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSource for TcpMessageSource {
    async fn read_message(&mut self) -> Result<Option<Bytes>> {
        let mut len_bytes = [0u8; FRAME_LENGTH_PREFIX];
        match self.stream.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(peer = %self.peer_addr, "TCP stream closed by peer");
                return Ok(None);
            }
            Err(e) => return Err(RemotingError::io("Failed to read message length", e)),
        }

        let message_len = u32::from_be_bytes(len_bytes) as usize;

        if message_len > self.max_message_size {
            self.discard(message_len).await?;
            return Err(ProtocolError::MessageTooLarge {
                size: message_len,
                max: self.max_message_size,
            }
            .into());
        }

        self.read_buffer.resize(message_len, 0);
        self.stream
            .read_exact(&mut self.read_buffer)
            .await
            .map_err(|e| RemotingError::io("Failed to read message data", e))?;

        self.bytes_received += (FRAME_LENGTH_PREFIX + message_len) as u64;

        debug!(
            peer = %self.peer_addr,
            bytes = message_len,
            total_received = self.bytes_received,
            "Received message over TCP"
        );

        Ok(Some(self.read_buffer.split_to(message_len).freeze()))
    }
}

/// Write half: frames each message with its length
pub struct TcpMessageSink {
    stream: OwnedWriteHalf,
    peer_addr: SocketAddr,
    max_message_size: usize,
    /// Reusable write buffer
    write_buffer: BytesMut,
    bytes_sent: u64,
}

impl TcpMessageSink {
    pub(crate) fn new(stream: OwnedWriteHalf, peer_addr: SocketAddr, config: &TcpNetworkConfig) -> Self {
        Self {
            stream,
            peer_addr,
            max_message_size: config.max_message_size,
            write_buffer: BytesMut::with_capacity(config.buffer_size),
            bytes_sent: 0,
        }
    }
}

#[async_trait]
impl MessageSink for TcpMessageSink {
    async fn write_message(&mut self, message: &[u8]) -> Result<()> {
        if message.len() > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: message.len(),
                max: self.max_message_size,
            }
            .into());
        }

        self.write_buffer.clear();
        self.write_buffer
            .extend_from_slice(&(message.len() as u32).to_be_bytes());
        self.write_buffer.extend_from_slice(message);

        // Single write call for the whole frame
        self.stream
            .write_all(&self.write_buffer)
            .await
            .map_err(|e| RemotingError::io("Failed to write message", e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| RemotingError::io("Failed to flush TCP stream", e))?;

        self.bytes_sent += (FRAME_LENGTH_PREFIX + message.len()) as u64;

        debug!(
            peer = %self.peer_addr,
            bytes = message.len(),
            total_sent = self.bytes_sent,
            "Sent message over TCP"
        );

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| RemotingError::io("Failed to shut down TCP stream", e))
    }
}
