//! Frame buffer for reassembling frames from partial reads.
//!
//! Bytes arrive from the transport arbitrarily chunked; the buffer accumulates
//! them in a single `BytesMut` and walks a two-state machine:
//! - `WaitingForHeader`: need at least 16 bytes
//! - `WaitingForBody`: header parsed, need `body_size` more bytes
//!
//! Bytes of an incomplete frame are never consumed; the state machine only
//! advances once a full header or body is available, so each push costs
//! O(frames extracted) rather than re-parsing the buffer from the start.
//!
//! Completed bodies are checksum-verified here. A mismatch still produces a
//! frame (the session id is needed to fail the right pending call), tagged as
//! [`DecodedFrame::ChecksumMismatch`]. Decompression is left to the engines so
//! an unsupported algorithm fails one call, not the connection.

use bytes::BytesMut;

use super::frame::Frame;
use super::wire_format::{Header, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use crate::checksum::checksum;
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete 16-byte header.
    WaitingForHeader,
    /// Header parsed and consumed, waiting for the body bytes.
    WaitingForBody { header: Header },
}

/// Outcome of reassembling one frame.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    /// Header and body are consistent.
    Valid(Frame),
    /// The body arrived but its checksum does not match the header.
    /// The frame is still routable by session id.
    ChecksumMismatch {
        /// The decoded header.
        header: Header,
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received body.
        actual: u32,
    },
}

impl DecodedFrame {
    /// Session id of this frame regardless of validity.
    pub fn session(&self) -> u16 {
        match self {
            DecodedFrame::Valid(frame) => frame.session(),
            DecodedFrame::ChecksumMismatch { header, .. } => header.session,
        }
    }
}

/// Buffer accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum body size tolerated before the stream is declared corrupt.
    max_body_size: u32,
}

impl FrameBuffer {
    /// Create a frame buffer with the default body-size limit.
    pub fn new() -> Self {
        Self::with_max_body_size(DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a frame buffer with a custom body-size limit.
    pub fn with_max_body_size(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_body_size,
        }
    }

    /// Push transport bytes and extract every frame that is now complete.
    ///
    /// Returns an empty vector while data is still fragmented; multiple frames
    /// delivered in one chunk all come back from the same push, in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RpcError::Protocol`] when a header describes a
    /// body larger than the configured maximum. The stream can no longer be
    /// parsed safely; the caller must close the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<DecodedFrame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffered bytes.
    fn try_extract_one(&mut self) -> Result<Option<DecodedFrame>> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = Header::decode(&self.buffer[..HEADER_SIZE])
                    .expect("buffer holds a full header");
                header.validate(self.max_body_size)?;

                let _ = self.buffer.split_to(HEADER_SIZE);
                self.state = State::WaitingForBody { header };

                // The body may already be buffered.
                self.try_extract_one()
            }

            State::WaitingForBody { header } => {
                let body_size = header.body_size as usize;
                if self.buffer.len() < body_size {
                    return Ok(None);
                }

                let header = *header;
                let body = self.buffer.split_to(body_size).freeze();
                self.state = State::WaitingForHeader;

                let actual = checksum(&body);
                if actual != header.checksum {
                    return Ok(Some(DecodedFrame::ChecksumMismatch {
                        header,
                        expected: header.checksum,
                        actual,
                    }));
                }

                Ok(Some(DecodedFrame::Valid(Frame::new(header, body))))
            }
        }
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer holds no pending bytes.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
