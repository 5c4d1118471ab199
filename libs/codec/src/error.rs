//! Protocol-level errors for remoting message processing
//!
//! Every variant carries enough context to tell which message and which
//! field failed. None of these errors is fatal to a channel on its own: the
//! receiver decides whether a failure drops one message or tears the channel
//! down.

use thiserror::Error;

/// Framing and encoding errors raised while reading or writing a message
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Message buffer is too small to contain the expected field
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// A message arrived with no header byte at all
    #[error("Empty message: no header tag present")]
    EmptyMessage,

    /// Header tag is not one of the named protocol tags
    #[error("Unknown header tag {tag:#04x}")]
    UnknownHeader { tag: u8 },

    /// Packed integer has too many continuation bytes or exceeds i32 range
    #[error("Invalid packed integer: {reason}")]
    InvalidPackedInteger { reason: String },

    /// Value cannot be written as a packed integer
    #[error("Packed integer out of range: {value} (must be 0..={max})", max = i32::MAX)]
    PackedIntegerOutOfRange { value: i64 },

    /// Length-prefixed string is not valid UTF-8
    #[error("Invalid UTF-8 string in {context}: {reason}")]
    InvalidUtf8 { context: String, reason: String },

    /// String is too long for its 16-bit length prefix
    #[error("String too long: {len} bytes exceeds {max}", max = u16::MAX)]
    StringTooLong { len: usize },

    /// Complete message exceeds the configured limit
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Compression level outside the deflate range
    #[error("Invalid compression level {level}: valid levels are 0-9")]
    InvalidCompressionLevel { level: u32 },

    /// Deflate or inflate failed
    #[error("Compression error: {operation} failed: {message}")]
    Compression { operation: String, message: String },

    /// A compressed message unwrapped into another compressed message
    #[error("Nested compressed message is not supported")]
    NestedCompression,

    /// Marshalled payload could not be encoded or decoded
    #[error("Marshalling error in {context}: {message}")]
    Marshalling { context: String, message: String },
}

/// Result type for codec operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Create a message too small error with context
    pub fn message_too_small(need: usize, got: usize, context: &str) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            context: context.to_string(),
        }
    }

    /// Create an invalid packed integer error
    pub fn invalid_packed_integer(reason: impl Into<String>) -> Self {
        Self::InvalidPackedInteger {
            reason: reason.into(),
        }
    }

    /// Create an invalid UTF-8 error
    pub fn invalid_utf8(context: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidUtf8 {
            context: context.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a compression error
    pub fn compression(operation: &str, message: impl std::fmt::Display) -> Self {
        Self::Compression {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a marshalling error
    pub fn marshalling(context: &str, message: impl std::fmt::Display) -> Self {
        Self::Marshalling {
            context: context.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether the error means the bytes on the wire were malformed
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            Self::MessageTooSmall { .. }
                | Self::EmptyMessage
                | Self::InvalidPackedInteger { .. }
                | Self::InvalidUtf8 { .. }
                | Self::MessageTooLarge { .. }
                | Self::Compression { .. }
                | Self::NestedCompression
        )
    }
}
