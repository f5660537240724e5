//! Body compression codecs.
//!
//! Each frame header names the transform applied to its body. `Disabled` and
//! `None` are both the identity; `Zstd` and `Lz4` are real codecs. An unknown
//! wire value fails that one frame with
//! [`RpcError::UnsupportedCompression`] rather than passing bytes through
//! silently.
//!
//! Compressed forms are self-describing: Zstd frames embed the original
//! length, and the LZ4 block is prefixed with a 4-byte little-endian original
//! length so decompression needs only the compressed bytes. Callers never see
//! the prefix.

use crate::error::{Result, RpcError};

/// Zstd compression level used for outgoing bodies.
const ZSTD_LEVEL: i32 = 3;

/// Body transform named by the header's compression byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    /// Compression disabled for this peer. Identity transform.
    Disabled = 0,
    /// No compression requested. Identity transform.
    None = 1,
    /// Zstandard.
    Zstd = 2,
    /// LZ4 block format with a 4-byte little-endian original-length prefix.
    Lz4 = 3,
}

impl Compression {
    /// Parse a wire value.
    ///
    /// Returns [`RpcError::UnsupportedCompression`] for unknown ids.
    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::Disabled),
            1 => Ok(Compression::None),
            2 => Ok(Compression::Zstd),
            3 => Ok(Compression::Lz4),
            other => Err(RpcError::UnsupportedCompression(other)),
        }
    }

    /// Wire value for this transform.
    #[inline]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Whether this transform leaves the body untouched.
    #[inline]
    pub fn is_identity(self) -> bool {
        matches!(self, Compression::Disabled | Compression::None)
    }
}

impl Default for Compression {
    fn default() -> Self {
        Compression::None
    }
}

/// Compress a body with the requested transform.
///
/// Identity transforms return the input unchanged (one copy into the owned
/// buffer, no header or prefix added).
pub fn compress(compression: Compression, body: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::Disabled | Compression::None => Ok(body.to_vec()),
        Compression::Zstd => zstd::bulk::compress(body, ZSTD_LEVEL)
            .map_err(|e| RpcError::Compression(format!("zstd compress: {}", e))),
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(body)),
    }
}

/// Reverse [`compress`].
///
/// The transform must match the one used on the encode side; the frame header
/// carries it across the wire.
pub fn decompress(compression: Compression, body: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::Disabled | Compression::None => Ok(body.to_vec()),
        Compression::Zstd => zstd::decode_all(body)
            .map_err(|e| RpcError::Compression(format!("zstd decompress: {}", e))),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(body)
            .map_err(|e| RpcError::Compression(format!("lz4 decompress: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(compression: Compression, body: &[u8]) {
        let compressed = compress(compression, body).unwrap();
        let decompressed = decompress(compression, &compressed).unwrap();
        assert_eq!(decompressed, body);
    }

    #[test]
    fn test_identity_roundtrip() {
        roundtrip(Compression::None, b"hello");
        roundtrip(Compression::Disabled, b"hello");
    }

    #[test]
    fn test_identity_leaves_bytes_unchanged() {
        let body = b"untouched";
        assert_eq!(compress(Compression::None, body).unwrap(), body);
        assert_eq!(compress(Compression::Disabled, body).unwrap(), body);
    }

    #[test]
    fn test_zstd_roundtrip() {
        roundtrip(Compression::Zstd, b"");
        roundtrip(Compression::Zstd, b"short");
        roundtrip(Compression::Zstd, &vec![0x5A; 256 * 1024]);
    }

    #[test]
    fn test_lz4_roundtrip() {
        roundtrip(Compression::Lz4, b"");
        roundtrip(Compression::Lz4, b"short");
        roundtrip(Compression::Lz4, &vec![0x42; 256 * 1024]);
    }

    #[test]
    fn test_lz4_size_prefix_is_little_endian() {
        let body = vec![7u8; 1000];
        let compressed = compress(Compression::Lz4, &body).unwrap();
        let prefix = u32::from_le_bytes([compressed[0], compressed[1], compressed[2], compressed[3]]);
        assert_eq!(prefix as usize, body.len());
    }

    #[test]
    fn test_compressible_body_shrinks() {
        let body = vec![0u8; 64 * 1024];
        assert!(compress(Compression::Zstd, &body).unwrap().len() < body.len());
        assert!(compress(Compression::Lz4, &body).unwrap().len() < body.len());
    }

    #[test]
    fn test_unknown_wire_value_rejected() {
        let err = Compression::from_wire(0x7F).unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedCompression(0x7F)));
    }

    #[test]
    fn test_wire_values_are_stable() {
        assert_eq!(Compression::Disabled.to_wire(), 0);
        assert_eq!(Compression::None.to_wire(), 1);
        assert_eq!(Compression::Zstd.to_wire(), 2);
        assert_eq!(Compression::Lz4.to_wire(), 3);
        for v in 0..=3 {
            assert_eq!(Compression::from_wire(v).unwrap().to_wire(), v);
        }
    }

    #[test]
    fn test_corrupt_compressed_body_fails() {
        let compressed = compress(Compression::Zstd, b"some body").unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        assert!(decompress(Compression::Zstd, truncated).is_err());
    }
}
