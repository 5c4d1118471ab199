//! Protocol constants shared by the server and its tests

/// Protocol versions this codec understands
pub const PROTOCOL_VERSION_ONE: u8 = 1;
pub const PROTOCOL_VERSION_TWO: u8 = 2;

/// Highest version offered in the server greeting
pub const LATEST_PROTOCOL_VERSION: u8 = PROTOCOL_VERSION_TWO;

/// Name of the default marshalling strategy offered in the greeting
pub const BINCODE_MARSHALLING: &str = "bincode";

/// Size of the transport length prefix
pub const FRAME_LENGTH_PREFIX: usize = 4;

/// Default maximum size of a single message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Opaque recovery flags used by transaction managers, passed through as-is
pub mod recovery_flags {
    pub const TMNOFLAGS: i32 = 0x0000_0000;
    pub const TMENDRSCAN: i32 = 0x0080_0000;
    pub const TMSTARTRSCAN: i32 = 0x0100_0000;
}
