//! Error types for wirecall.

use thiserror::Error;

/// Main error type for all wirecall operations.
///
/// Every variant is recoverable at the call boundary; only [`RpcError::Protocol`]
/// signals a stream corrupt enough that the connection must be closed.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during transport operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (implausible body size, malformed stream). Connection-fatal.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Body checksum did not match the header.
    #[error("Checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the frame header.
        expected: u32,
        /// Checksum computed over the received body.
        actual: u32,
    },

    /// Frame carried an unknown compression id. Fatal for that frame only.
    #[error("Unsupported compression id: {0}")]
    UnsupportedCompression(u8),

    /// Compression or decompression of a body failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Session allocator exhausted its retry budget under contention.
    /// Transient; the caller may retry.
    #[error("Session id space under contention, retries exhausted")]
    SessionsExhausted,

    /// Peer answered with an error response (unknown method, handler failure).
    #[error("Remote error: {0}")]
    Remote(String),

    /// Connection closed while calls were still pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Caller-side deadline elapsed before a response arrived.
    #[error("Call timed out")]
    Timeout,

    /// Writer backpressure did not clear within the configured window.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
