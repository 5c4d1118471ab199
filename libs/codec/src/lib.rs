//! # EJB Remoting Codec
//!
//! ## Purpose
//!
//! Wire-level building blocks of the remoting protocol, with no knowledge of
//! sockets, threads or handlers:
//! - Header tags (one byte at the start of every message)
//! - Packed integers and length-prefixed UTF-8 strings
//! - A bounds-checked [`MessageReader`] and a [`MessageWriter`]
//! - Raw DEFLATE compression with level validation and an inflation cap
//! - Protocol error types
//!
//! ## Architecture Role
//!
//! ```text
//! [codec] → network/
//!    ↓          ↓
//! Framing    Channels, dispatch,
//! Encoding   handlers, workers
//! ```
//!
//! ## Message Layout
//!
//! ```text
//! +-----+----------------+--------------------------+
//! | tag | correlation id | body (handler specific)  |
//! | u8  | u16 BE         |                          |
//! +-----+----------------+--------------------------+
//! ```
//!
//! A compressed message is the `0x1B` tag followed by a raw DEFLATE stream
//! whose inflated bytes form another complete message.

pub mod compression;
pub mod constants;
pub mod error;
pub mod header;
pub mod message;
pub mod packed;
pub mod reader;
pub mod writer;

pub use compression::{deflate, deflate_writer, inflate, CompressionLevel, DEFAULT_MAX_INFLATED_SIZE};
pub use constants::*;
pub use error::{ProtocolError, ProtocolResult};
pub use header::{describe_tag, HeaderTag};
pub use message::InboundMessage;
pub use reader::MessageReader;
pub use writer::MessageWriter;
