//! Body integrity checksum.
//!
//! The wire carries the low 32 bits of a 64-bit xxHash over the transmitted
//! body (the compressed form when compression is applied). This is an
//! integrity check against transport corruption, not authentication: the hash
//! is fast and order-sensitive but makes no adversarial guarantees.

use xxhash_rust::xxh64::xxh64;

/// Compute the wire checksum for a frame body.
///
/// Defined as `xxh64(bytes) & 0xFFFF_FFFF`. Always computed over the exact
/// bytes that travel after the header.
///
/// # Example
///
/// ```
/// use wirecall::checksum::checksum;
///
/// let sum = checksum(b"ping");
/// assert_eq!(sum, checksum(b"ping"));
/// assert_ne!(sum, checksum(b"pong"));
/// ```
#[inline]
pub fn checksum(bytes: &[u8]) -> u32 {
    (xxh64(bytes, 0) & 0xFFFF_FFFF) as u32
}

/// Verify a body against the checksum carried in its header.
#[inline]
pub fn verify(bytes: &[u8], expected: u32) -> bool {
    checksum(bytes) == expected
}
