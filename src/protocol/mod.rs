//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the text protocol spoken on every socket:
//! - `[GLS]` / `[GLE]` frame markers around a JSON body
//! - Frame buffer for accumulating partial reads
//! - Message struct with typed constructors and validation

mod frame_buffer;
mod message;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use message::{Message, MessageType, Payload};
pub use wire_format::{
    encode_frame, strip_markers, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_SESSIONS, END_MARKER,
    START_MARKER,
};
