//! Header tags
//!
//! Every message on the wire starts with exactly one tag byte. The enum names
//! the tags this server reads or writes; dispatch itself works on the raw
//! byte so that unknown tags can still be routed to the error path.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Named header tags of the remoting protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum HeaderTag {
    SessionOpenRequest = 0x01,
    SessionOpenResponse = 0x02,
    InvocationRequest = 0x03,
    InvocationCancelRequest = 0x04,
    InvocationResponse = 0x05,
    InvocationFailure = 0x06,
    ModuleAvailable = 0x08,
    ModuleUnavailable = 0x09,
    NoSuchEjb = 0x0A,
    NoSuchMethod = 0x0B,
    EjbNotStateful = 0x0D,
    TxRecoverRequest = 0x19,
    TxRecoverResponse = 0x1A,
    /// Compressed message wrapper, also used as the compressed-response sub-header
    CompressedMessage = 0x1B,
    InvocationCancelled = 0x20,
}

impl HeaderTag {
    /// Raw byte value
    #[inline]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Look up a named tag, `None` for bytes outside the protocol
    pub fn from_byte(tag: u8) -> Option<Self> {
        Self::try_from(tag).ok()
    }

    /// Human-readable name for logging
    pub fn name(self) -> &'static str {
        match self {
            Self::SessionOpenRequest => "session-open-request",
            Self::SessionOpenResponse => "session-open-response",
            Self::InvocationRequest => "invocation-request",
            Self::InvocationCancelRequest => "invocation-cancel-request",
            Self::InvocationResponse => "invocation-response",
            Self::InvocationFailure => "invocation-failure",
            Self::ModuleAvailable => "module-available",
            Self::ModuleUnavailable => "module-unavailable",
            Self::NoSuchEjb => "no-such-ejb",
            Self::NoSuchMethod => "no-such-method",
            Self::EjbNotStateful => "ejb-not-stateful",
            Self::TxRecoverRequest => "tx-recover-request",
            Self::TxRecoverResponse => "tx-recover-response",
            Self::CompressedMessage => "compressed-message",
            Self::InvocationCancelled => "invocation-cancelled",
        }
    }
}

impl std::fmt::Display for HeaderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.byte())
    }
}

/// Describe a raw tag byte for log output
pub fn describe_tag(tag: u8) -> String {
    match HeaderTag::from_byte(tag) {
        Some(named) => named.to_string(),
        None => format!("unknown ({:#04x})", tag),
    }
}
