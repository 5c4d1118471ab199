//! Remoting Error Types
//!
//! Error handling for channel I/O, handler dispatch and the collaborators
//! handlers call into.

use codec::ProtocolError;
use thiserror::Error;

/// Main remoting error type
#[derive(Error, Debug)]
pub enum RemotingError {
    /// Connection management errors
    #[error("Connection error: {message} (peer: {peer:?})")]
    Connection {
        message: String,
        peer: Option<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The channel association has been closed
    #[error("Channel closed: {peer}")]
    ChannelClosed { peer: String },

    /// Framing and encoding errors from the codec
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No handler is registered for a header tag in any protocol version
    #[error("Unrecognized header {tag:#04x} for protocol version {version}")]
    UnrecognizedHeader { tag: u8, version: u8 },

    /// Version handshake failed
    #[error("Handshake error: {message}")]
    Handshake { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Marshalling of a payload object failed
    #[error("Marshalling error: {message}")]
    Marshalling {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An invocation with the same correlation id is still outstanding
    #[error("Correlation id {id} is already in use on this channel")]
    DuplicateCorrelationId { id: u16 },

    /// Worker pool has been shut down or a worker task failed
    #[error("Worker error: {message}")]
    Worker { message: String },

    /// Transport timeout errors
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for remoting operations
pub type Result<T> = std::result::Result<T, RemotingError>;

impl RemotingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>, peer: Option<&str>) -> Self {
        Self::Connection {
            message: message.into(),
            peer: peer.map(|p| p.to_string()),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        peer: Option<&str>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            peer: peer.map(|p| p.to_string()),
            source: Some(Box::new(source)),
        }
    }

    /// Create a channel closed error
    pub fn channel_closed(peer: impl Into<String>) -> Self {
        Self::ChannelClosed { peer: peer.into() }
    }

    /// Create a handshake error
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a marshalling error
    pub fn marshalling(message: impl Into<String>) -> Self {
        Self::Marshalling {
            message: message.into(),
            source: None,
        }
    }

    /// Create a marshalling error with source
    pub fn marshalling_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Marshalling {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a worker error
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Check if the error leaves the channel unusable
    pub fn is_fatal_to_channel(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ChannelClosed { .. }
                | Self::UnrecognizedHeader { .. }
                | Self::Handshake { .. }
                | Self::Io { .. }
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::ChannelClosed { .. } => "channel_closed",
            Self::Protocol(_) => "protocol",
            Self::UnrecognizedHeader { .. } => "unrecognized_header",
            Self::Handshake { .. } => "handshake",
            Self::Configuration { .. } => "configuration",
            Self::Marshalling { .. } => "marshalling",
            Self::DuplicateCorrelationId { .. } => "duplicate_correlation_id",
            Self::Worker { .. } => "worker",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for RemotingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: "I/O operation failed".to_string(),
            source: err,
        }
    }
}

impl From<bincode::Error> for RemotingError {
    fn from(err: bincode::Error) -> Self {
        Self::marshalling_with_source("bincode marshalling failed", err)
    }
}

impl From<tokio::task::JoinError> for RemotingError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::worker(format!("worker task failed: {}", err))
    }
}
