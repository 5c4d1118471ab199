//! Versioned handler registry
//!
//! Each protocol version contributes a [`HandlerTable`] of 256 slots indexed
//! by header tag. A [`HandlerRegistry`] chains the tables current version
//! first, so a newer version can reinterpret a tag while still falling back
//! to the older table for everything it leaves alone.

use crate::handlers::{
    CompressedMessageHandler, InvocationCancelHandler, InvocationHandler, MessageHandler,
    SessionOpenHandler, TxRecoverHandler,
};
use crate::{RemotingError, Result};
use codec::{HeaderTag, PROTOCOL_VERSION_ONE, PROTOCOL_VERSION_TWO};
use std::sync::Arc;

/// Handlers of one protocol version
pub struct HandlerTable {
    version: u8,
    slots: Box<[Option<Arc<dyn MessageHandler>>; 256]>,
}

impl HandlerTable {
    pub fn new(version: u8) -> Self {
        Self {
            version,
            slots: Box::new(std::array::from_fn(|_| None)),
        }
    }

    /// Bind `handler` to `tag`, replacing any earlier binding
    pub fn with(mut self, tag: HeaderTag, handler: impl MessageHandler + 'static) -> Self {
        self.slots[tag.byte() as usize] = Some(Arc::new(handler));
        self
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn get(&self, tag: u8) -> Option<&Arc<dyn MessageHandler>> {
        self.slots[tag as usize].as_ref()
    }

    /// Tags bound in this table
    pub fn tags(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(tag, _)| tag as u8)
    }

    /// Session open, uncompressed invocation and invocation cancel
    pub fn version_one() -> Self {
        Self::new(PROTOCOL_VERSION_ONE)
            .with(HeaderTag::SessionOpenRequest, SessionOpenHandler)
            .with(HeaderTag::InvocationRequest, InvocationHandler::uncompressed())
            .with(HeaderTag::InvocationCancelRequest, InvocationCancelHandler)
    }

    /// Compression-capable invocation, transaction recovery and compressed
    /// messages
    pub fn version_two() -> Self {
        Self::new(PROTOCOL_VERSION_TWO)
            .with(HeaderTag::InvocationRequest, InvocationHandler::compression_capable())
            .with(HeaderTag::TxRecoverRequest, TxRecoverHandler)
            .with(HeaderTag::CompressedMessage, CompressedMessageHandler)
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("version", &self.version)
            .field("tags", &self.tags().collect::<Vec<_>>())
            .finish()
    }
}

/// Chain of handler tables, searched in order
#[derive(Debug)]
pub struct HandlerRegistry {
    tables: Vec<HandlerTable>,
}

impl HandlerRegistry {
    /// Chain `tables`, first table searched first
    pub fn new(tables: Vec<HandlerTable>) -> Self {
        Self { tables }
    }

    /// Standard chain for a negotiated protocol version
    pub fn for_version(version: u8) -> Result<Self> {
        match version {
            PROTOCOL_VERSION_ONE => Ok(Self::new(vec![HandlerTable::version_one()])),
            PROTOCOL_VERSION_TWO => Ok(Self::new(vec![
                HandlerTable::version_two(),
                HandlerTable::version_one(),
            ])),
            other => Err(RemotingError::handshake(format!(
                "unsupported protocol version {}",
                other
            ))),
        }
    }

    /// Version of the first table in the chain
    pub fn version(&self) -> u8 {
        self.tables.first().map(HandlerTable::version).unwrap_or(0)
    }

    /// First handler bound to `tag`, with the version of the table it came from
    pub fn lookup(&self, tag: u8) -> Option<(u8, Arc<dyn MessageHandler>)> {
        self.tables
            .iter()
            .find_map(|table| table.get(tag).map(|handler| (table.version(), handler.clone())))
    }
}
