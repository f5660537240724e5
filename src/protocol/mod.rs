//! Wire protocol: header codec, frame encoder and stream reassembly.

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{encode_frame, EncodedFrame, Frame};
pub use frame_buffer::{DecodedFrame, FrameBuffer};
pub use wire_format::{flags, Header, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
