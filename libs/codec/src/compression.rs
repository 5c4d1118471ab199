//! Response compression
//!
//! Raw DEFLATE compression for invocation responses and compressed message
//! wrappers. Levels follow the standard deflate scale (0 = store, 9 = best).

use crate::error::{ProtocolError, ProtocolResult};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

/// Default cap on inflated message size
pub const DEFAULT_MAX_INFLATED_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Validated deflate level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    pub const NONE: Self = Self(0);
    pub const FAST: Self = Self(1);
    pub const DEFAULT: Self = Self(6);
    pub const BEST: Self = Self(9);

    /// Create a level, rejecting anything outside 0-9
    pub fn new(level: u32) -> ProtocolResult<Self> {
        if level > 9 {
            return Err(ProtocolError::InvalidCompressionLevel { level });
        }
        Ok(Self(level))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    fn as_flate(self) -> Compression {
        Compression::new(self.0)
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for CompressionLevel {
    type Error = ProtocolError;

    fn try_from(level: u32) -> ProtocolResult<Self> {
        Self::new(level)
    }
}

impl From<CompressionLevel> for u32 {
    fn from(level: CompressionLevel) -> Self {
        level.0
    }
}

/// Wrap a writer in a raw DEFLATE encoder
///
/// Everything written to the returned encoder is compressed; call
/// [`DeflateEncoder::finish`] to flush the final block.
pub fn deflate_writer<W: Write>(inner: W, level: CompressionLevel) -> DeflateEncoder<W> {
    DeflateEncoder::new(inner, level.as_flate())
}

/// Compress a buffer in one call
pub fn deflate(data: &[u8], level: CompressionLevel) -> ProtocolResult<Vec<u8>> {
    let mut encoder = deflate_writer(Vec::with_capacity(data.len() / 2 + 16), level);
    encoder
        .write_all(data)
        .map_err(|e| ProtocolError::compression("deflate", e))?;
    encoder
        .finish()
        .map_err(|e| ProtocolError::compression("deflate", e))
}

/// Decompress a raw DEFLATE stream, refusing output above `max_size`
pub fn inflate(data: &[u8], max_size: usize) -> ProtocolResult<Vec<u8>> {
    let decoder = DeflateDecoder::new(data);
    let mut output = Vec::with_capacity(std::cmp::min(data.len() * 4, max_size));

    // Read one byte past the limit so an oversized stream is detected
    let mut limited = decoder.take(max_size as u64 + 1);
    limited
        .read_to_end(&mut output)
        .map_err(|e| ProtocolError::compression("inflate", e))?;

    if output.len() > max_size {
        debug!(compressed = data.len(), max = max_size, "Refusing oversized inflated message");
        return Err(ProtocolError::MessageTooLarge {
            size: output.len(),
            max: max_size,
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_level_bounds() {
        assert!(CompressionLevel::new(0).is_ok());
        assert!(CompressionLevel::new(9).is_ok());
        assert_eq!(
            CompressionLevel::new(10),
            Err(ProtocolError::InvalidCompressionLevel { level: 10 })
        );
    }

    #[test]
    fn test_repetitive_data_shrinks() {
        let data = b"The quick brown fox jumps over the lazy dog ".repeat(50);
        let compressed = deflate(&data, CompressionLevel::BEST).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(inflate(&compressed, DEFAULT_MAX_INFLATED_SIZE).unwrap(), data);
    }

    #[test]
    fn test_empty_data() {
        let compressed = deflate(&[], CompressionLevel::DEFAULT).unwrap();
        assert!(inflate(&compressed, 16).unwrap().is_empty());
    }

    #[test]
    fn test_inflate_limit() {
        let data = vec![0u8; 4096];
        let compressed = deflate(&data, CompressionLevel::BEST).unwrap();
        assert!(matches!(
            inflate(&compressed, 1024),
            Err(ProtocolError::MessageTooLarge { max: 1024, .. })
        ));
        assert_eq!(inflate(&compressed, 4096).unwrap().len(), 4096);
    }

    #[test]
    fn test_garbage_is_compression_error() {
        let err = inflate(&[0xFF, 0xFF, 0xFF, 0xFF], 1024).unwrap_err();
        assert!(err.is_framing_error());
    }

    proptest! {
        #[test]
        fn prop_deflate_inflate_identity(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            level in 0u32..=9,
        ) {
            let level = CompressionLevel::new(level).unwrap();
            let compressed = deflate(&data, level).unwrap();
            let restored = inflate(&compressed, DEFAULT_MAX_INFLATED_SIZE).unwrap();
            prop_assert_eq!(restored, data);
        }
    }
}
