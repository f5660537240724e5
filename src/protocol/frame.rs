//! Frame construction and encoding.
//!
//! A [`Frame`] is one decoded header plus its body as transmitted (still
//! compressed). [`encode_frame`] is the single encode path: compress the body,
//! size and checksum the compressed form, prepend the 16-byte header. Encoding
//! is atomic from the caller's perspective; no partial frame is ever exposed.

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};
use crate::checksum::checksum;
use crate::compression::{compress, Compression};
use crate::error::{Result, RpcError};

/// A complete protocol frame as it appears on the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes exactly as transmitted (post-compression, zero-copy).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Session id this frame belongs to.
    #[inline]
    pub fn session(&self) -> u16 {
        self.header.session
    }

    /// Method meta identifying the target handler.
    #[inline]
    pub fn method_meta(&self) -> u32 {
        self.header.method_meta
    }

    /// Check if this is an error response frame.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.header.is_error()
    }
}

/// An encoded frame ready for the writer task.
///
/// Header and body are kept as separate parts so the writer can use vectored
/// writes without copying the body again.
#[derive(Debug)]
pub struct EncodedFrame {
    /// Pre-encoded 16-byte header.
    pub header: [u8; HEADER_SIZE],
    /// Compressed body bytes.
    pub body: Bytes,
}

impl EncodedFrame {
    /// Total wire size of this frame (header + body).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Flatten into a single contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Encode one frame.
///
/// Steps, in order: compress `body` with the requested transform, compute
/// `body_size` from the compressed length, compute the checksum over the
/// compressed bytes, encode the header.
///
/// # Example
///
/// ```
/// use wirecall::compression::Compression;
/// use wirecall::protocol::{encode_frame, HEADER_SIZE};
///
/// let frame = encode_frame(42, 0x0CAFE000, Compression::None, 0, b"ping").unwrap();
/// assert_eq!(frame.size(), HEADER_SIZE + 4);
/// ```
pub fn encode_frame(
    session: u16,
    method_meta: u32,
    compression: Compression,
    flags: u8,
    body: &[u8],
) -> Result<EncodedFrame> {
    let compressed = compress(compression, body)?;
    let body_size = checked_body_size(compressed.len())?;
    let header = Header::new(
        compression.to_wire(),
        flags,
        session,
        body_size,
        checksum(&compressed),
        method_meta,
    );
    Ok(EncodedFrame {
        header: header.encode(),
        body: Bytes::from(compressed),
    })
}

/// The header's size field is 32-bit; a body that does not fit must fail the
/// encode instead of truncating into a corrupt frame.
fn checked_body_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        RpcError::Protocol(format!(
            "Body size {} exceeds the header's 32-bit size field",
            len
        ))
    })
}
