//! Channel association
//!
//! Wraps the write half of one physical channel. Responses are produced
//! concurrently by worker tasks, so the sink sits behind an async mutex: a
//! writer acquires an [`OutboundMessage`], fills it, and [`send`]s it while
//! still holding the lock. Dropping the guard on any path releases the lock
//! and discards whatever was buffered, so a message is either written whole
//! or not at all.
//!
//! [`send`]: OutboundMessage::send

use crate::transport::MessageSink;
use crate::{RemotingError, Result};
use bytes::BytesMut;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Write side of one connection plus its close state
pub struct ChannelAssociation {
    sink: Mutex<Box<dyn MessageSink>>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    peer: String,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl ChannelAssociation {
    pub fn new(sink: Box<dyn MessageSink>, peer: impl Into<String>) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            close_tx,
            peer: peer.into(),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Wait for exclusive use of the channel's output
    ///
    /// Fails once the association has been closed, including when it is
    /// closed while this call is waiting for the lock.
    pub async fn acquire_output_stream(&self) -> Result<OutboundMessage<'_>> {
        if self.is_closed() {
            return Err(RemotingError::channel_closed(self.peer.clone()));
        }
        let guard = self.sink.lock().await;
        if self.is_closed() {
            return Err(RemotingError::channel_closed(self.peer.clone()));
        }
        Ok(OutboundMessage {
            association: self,
            sink: guard,
            buffer: BytesMut::with_capacity(256),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the association; later calls are no-ops
    ///
    /// A writer blocked in [`OutboundMessage::send`] is abandoned rather than
    /// waited for, so a peer that stopped reading cannot hold up the close.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_tx.send_replace(true);

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Sink shutdown failed");
        }
        debug!(
            peer = %self.peer,
            messages_sent = self.messages_sent(),
            bytes_sent = self.bytes_sent(),
            "Channel association closed"
        );
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        // The sender lives as long as self, so wait_for cannot fail here
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ChannelAssociation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAssociation")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One outbound message being built under the association's write lock
pub struct OutboundMessage<'a> {
    association: &'a ChannelAssociation,
    sink: MutexGuard<'a, Box<dyn MessageSink>>,
    buffer: BytesMut,
}

impl std::fmt::Debug for OutboundMessage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("peer", &self.association.peer)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl OutboundMessage<'_> {
    /// Bytes buffered so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Write the buffered message and release the lock
    ///
    /// Fails with [`RemotingError::ChannelClosed`] if the association is
    /// closed before the write completes; the partial write is abandoned.
    pub async fn send(mut self) -> Result<()> {
        let len = self.buffer.len();
        let association = self.association;
        let written = tokio::select! {
            biased;
            written = self.sink.write_message(&self.buffer) => written,
            _ = association.closed() => {
                debug!(peer = %association.peer, bytes = len, "Write abandoned, association closed");
                return Err(RemotingError::channel_closed(association.peer.clone()));
            }
        };
        match written {
            Ok(()) => {
                self.association.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.association
                    .bytes_sent
                    .fetch_add(len as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                warn!(peer = %self.association.peer, bytes = len, error = %e, "Failed to write message");
                Err(e)
            }
        }
    }
}

impl io::Write for OutboundMessage<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pipe;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_writes_one_message() {
        let (server, mut client) = pipe(8);
        let association = ChannelAssociation::new(server.sink, server.peer);

        let mut out = association.acquire_output_stream().await.unwrap();
        out.write_all(&[0x05, 0x00]).unwrap();
        out.write_all(&[0x07, 0xAA]).unwrap();
        out.send().await.unwrap();

        let received = client.source.read_message().await.unwrap().unwrap();
        assert_eq!(received.as_ref(), &[0x05, 0x00, 0x07, 0xAA]);
        assert_eq!(association.messages_sent(), 1);
        assert_eq!(association.bytes_sent(), 4);
    }

    #[tokio::test]
    async fn test_dropped_message_is_discarded_and_lock_released() {
        let (server, mut client) = pipe(8);
        let association = ChannelAssociation::new(server.sink, server.peer);

        {
            let mut out = association.acquire_output_stream().await.unwrap();
            out.write_all(&[0xDE, 0xAD]).unwrap();
        }

        let mut out = association.acquire_output_stream().await.unwrap();
        out.write_all(&[0x1A]).unwrap();
        out.send().await.unwrap();

        let received = client.source.read_message().await.unwrap().unwrap();
        assert_eq!(received.as_ref(), &[0x1A]);
    }

    #[tokio::test]
    async fn test_second_writer_waits_for_the_first() {
        let (server, mut client) = pipe(8);
        let association = ChannelAssociation::new(server.sink, server.peer);

        let mut first = association.acquire_output_stream().await.unwrap();
        let mut second = tokio_test::task::spawn(association.acquire_output_stream());
        tokio_test::assert_pending!(second.poll());

        first.write_all(&[0x01]).unwrap();
        first.send().await.unwrap();
        assert!(second.is_woken());

        let mut second = tokio_test::assert_ready_ok!(second.poll());
        second.write_all(&[0x02]).unwrap();
        second.send().await.unwrap();

        assert_eq!(client.source.read_message().await.unwrap().unwrap().as_ref(), &[0x01]);
        assert_eq!(client.source.read_message().await.unwrap().unwrap().as_ref(), &[0x02]);
    }

    #[tokio::test]
    async fn test_close_abandons_stalled_writer() {
        // Capacity one and the client never reads
        let (server, _client) = pipe(1);
        let association = Arc::new(ChannelAssociation::new(server.sink, server.peer));

        let mut out = association.acquire_output_stream().await.unwrap();
        out.write_all(&[0x01]).unwrap();
        out.send().await.unwrap();

        let writer = {
            let association = association.clone();
            tokio::spawn(async move {
                let mut out = association.acquire_output_stream().await.unwrap();
                out.write_all(&[0x02]).unwrap();
                out.send().await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        tokio::time::timeout(Duration::from_secs(2), association.close())
            .await
            .expect("close waited for the stalled writer");
        assert!(matches!(
            writer.await.unwrap(),
            Err(RemotingError::ChannelClosed { .. })
        ));
        assert_eq!(association.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_writers() {
        let (server, mut client) = pipe(8);
        let association = Arc::new(ChannelAssociation::new(server.sink, server.peer));

        let waiter = {
            let association = association.clone();
            tokio::spawn(async move { association.closed().await })
        };

        association.close().await;
        association.close().await;
        waiter.await.unwrap();

        assert!(association.is_closed());
        assert!(matches!(
            association.acquire_output_stream().await,
            Err(RemotingError::ChannelClosed { .. })
        ));
        assert!(client.source.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_resolves_when_already_closed() {
        let (server, _client) = pipe(8);
        let association = ChannelAssociation::new(server.sink, server.peer);
        association.close().await;
        association.closed().await;
    }
}
