//! In-process message pipe
//!
//! Two connected [`Channel`]s backed by bounded tokio channels. Used by the
//! integration tests and by embedders that run client and server in one
//! process.

use super::{Channel, MessageSink, MessageSource, TransportType};
use crate::{RemotingError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Receiving half of a memory pipe
pub struct MemorySource {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn read_message(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}

/// Sending half of a memory pipe
pub struct MemorySink {
    tx: Option<mpsc::Sender<Bytes>>,
    peer: String,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn write_message(&mut self, message: &[u8]) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RemotingError::channel_closed(self.peer.clone()))?;
        tx.send(Bytes::copy_from_slice(message))
            .await
            .map_err(|_| RemotingError::channel_closed(self.peer.clone()))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Create a connected pair: whatever one side's sink writes, the other
/// side's source reads
pub fn pipe(capacity: usize) -> (Channel, Channel) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);

    let a = Channel::new(
        Box::new(MemorySource { rx: b_rx }),
        Box::new(MemorySink {
            tx: Some(a_tx),
            peer: "memory:b".to_string(),
        }),
        "memory:b",
        TransportType::Memory,
    );
    let b = Channel::new(
        Box::new(MemorySource { rx: a_rx }),
        Box::new(MemorySink {
            tx: Some(b_tx),
            peer: "memory:a".to_string(),
        }),
        "memory:a",
        TransportType::Memory,
    );
    (a, b)
}
