//! Wire format encoding and decoding.
//!
//! Implements the fixed 16-byte header format:
//! ```text
//! ┌─────────────┬───────┬─────────┬───────────┬──────────┬─────────────┐
//! │ Compression │ Flags │ Session │ Body size │ Checksum │ Method meta │
//! │ 1 byte      │ 1 byte│ 2 bytes │ 4 bytes   │ 4 bytes  │ 4 bytes     │
//! │             │       │ u16 LE  │ u32 LE    │ u32 LE   │ u32 LE      │
//! └─────────────┴───────┴─────────┴───────────┴──────────┴─────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. Byte order, field widths and
//! field order are a compatibility contract with every peer implementation of
//! the protocol and are not configurable.

use crate::error::{Result, RpcError};

/// Header size in bytes (fixed, exactly 16).
pub const HEADER_SIZE: usize = 16;

/// Default maximum body size accepted from the wire (64 MB).
///
/// A header describing a larger body is treated as stream corruption: an
/// unbounded size field is a resource-exhaustion vector.
pub const DEFAULT_MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

/// Flag constants for the header's flags byte.
///
/// The byte is reserved except for the bits named here; unknown bits
/// round-trip unchanged through encode/decode.
pub mod flags {
    /// Error response: body is a UTF-8 error message, not a method result.
    pub const ERROR: u8 = 0b0000_0001;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Compression id for the body (see [`crate::compression::Compression`]).
    pub compression: u8,
    /// Flags byte (see [`flags`]).
    pub flags: u8,
    /// Session id correlating a request with its response.
    pub session: u16,
    /// Byte count of the body following this header, post-compression.
    pub body_size: u32,
    /// Low 32 bits of xxh64 over the transmitted (post-compression) body.
    pub checksum: u32,
    /// Identifier of the target handler (service + method composite id).
    pub method_meta: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(
        compression: u8,
        flags: u8,
        session: u16,
        body_size: u32,
        checksum: u32,
        method_meta: u32,
    ) -> Self {
        Self {
            compression,
            flags,
            session,
            body_size,
            checksum,
            method_meta,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use wirecall::protocol::Header;
    ///
    /// let header = Header::new(1, 0, 42, 4, 0xDEAD_BEEF, 0x0CAFE000);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 16);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.compression;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.session.to_le_bytes());
        buf[4..8].copy_from_slice(&self.body_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12..16].copy_from_slice(&self.method_meta.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if the buffer is too short. The frame buffer never calls
    /// this with fewer than 16 bytes available.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            compression: buf[0],
            flags: buf[1],
            session: u16::from_le_bytes([buf[2], buf[3]]),
            body_size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            checksum: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            method_meta: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    /// Validate a header read from the wire.
    ///
    /// A body size beyond `max_body_size` means the stream can no longer be
    /// parsed safely and the connection must be closed.
    pub fn validate(&self, max_body_size: u32) -> Result<()> {
        if self.body_size > max_body_size {
            return Err(RpcError::Protocol(format!(
                "Body size {} exceeds maximum {}",
                self.body_size, max_body_size
            )));
        }
        Ok(())
    }

    /// Check if this frame is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.flags, flags::ERROR)
    }
}
