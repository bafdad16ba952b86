//! Wire framing: request assembly and response parsing.
//!
//! A frame is the wire unit of the protocol: a fixed 8-byte header
//! followed by `length` body bytes. Requests are buffered in full by
//! [`FrameWriter`] so that each frame reaches the socket in one
//! contiguous write; responses are read in full by the read pump before
//! any user decoding, so a misbehaving decoder can never desynchronize
//! the stream.

mod body;
mod header;
mod reader;
mod writer;

pub use body::FrameBody;
pub use header::{
    flags, FrameHeader, Opcode, DIRECTION_RESPONSE, HEADER_SIZE, MAX_BODY_LENGTH, PROTOCOL_VERSION,
    STREAM_ID_COUNT,
};
pub use reader::ResponseFrame;
pub use writer::FrameWriter;

pub(crate) use reader::read_frame;
