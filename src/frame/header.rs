//! Wire format for the fixed frame header.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌─────────┬───────┬────────┬────────┬──────────┐
//! │ Version │ Flags │ Stream │ Opcode │ Length   │
//! │ 1 byte  │ 1 byte│ int8   │ 1 byte │ uint32 BE│
//! └─────────┴───────┴────────┴────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. The version byte carries the
//! protocol version in its low seven bits; bit `0x80` marks a response.

use crate::error::{DriverError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Protocol version spoken by this transport. Version 2 is the last
/// revision with signed 8-bit stream ids.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Direction bit in the version byte: set on server responses.
pub const DIRECTION_RESPONSE: u8 = 0x80;

/// Number of usable stream ids (`0..=127`).
pub const STREAM_ID_COUNT: usize = 128;

/// Maximum accepted body length (256 MiB). A header claiming more is a
/// framing violation.
pub const MAX_BODY_LENGTH: u32 = 256 * 1024 * 1024;

/// Flag constants for the header flags byte.
pub mod flags {
    /// Tracing: requested on a request, trace id present on a response.
    pub const TRACING: u8 = 0x02;

    /// Bits with no assigned meaning; must be zero on requests.
    pub const RESERVED_MASK: u8 = !TRACING;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Frame opcodes.
///
/// The transport treats these as opaque caller-supplied values except for
/// `Error` (per-request protocol error), and `Ready`/`Authenticate`
/// (handshake).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Credentials = 0x04,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
}

impl Opcode {
    /// Decode an opcode byte. Unknown values are a framing violation.
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x04 => Opcode::Credentials,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x09 => Opcode::Prepare,
            0x0A => Opcode::Execute,
            0x0B => Opcode::Register,
            0x0C => Opcode::Event,
            other => return Err(DriverError::Frame(format!("unknown opcode 0x{other:02x}"))),
        })
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Version byte, including the direction bit.
    pub version: u8,
    /// Flags byte (see [`flags`]).
    pub flags: u8,
    /// Stream id. Requests use `0..=127`; negative values are reserved
    /// for server-initiated events.
    pub stream: i8,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Body length in bytes.
    pub length: u32,
}

impl FrameHeader {
    /// Create a request header for the current protocol version.
    pub fn request(flags: u8, stream: i8, opcode: Opcode, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags,
            stream,
            opcode,
            length,
        }
    }

    /// Encode the header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1] = self.flags;
        buf[2] = self.stream as u8;
        buf[3] = self.opcode as u8;
        buf[4..8].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode a header from exactly [`HEADER_SIZE`] bytes.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        Ok(Self {
            version: buf[0],
            flags: buf[1],
            stream: buf[2] as i8,
            opcode: Opcode::from_u8(buf[3])?,
            length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate a header received from the server.
    ///
    /// Checks the response direction bit and the body length bound;
    /// either failing means the stream can no longer be trusted to be
    /// frame-aligned.
    pub fn validate_response(&self) -> Result<()> {
        if self.version & DIRECTION_RESPONSE == 0 {
            return Err(DriverError::Frame(format!(
                "frame version 0x{:02x} is not a response",
                self.version
            )));
        }
        if self.length > MAX_BODY_LENGTH {
            return Err(DriverError::Frame(format!(
                "body length {} exceeds maximum {}",
                self.length, MAX_BODY_LENGTH
            )));
        }
        Ok(())
    }

    /// Check if the tracing flag is set.
    #[inline]
    pub fn has_tracing(&self) -> bool {
        flags::has_flag(self.flags, flags::TRACING)
    }

    /// Check if this is a server-initiated event frame (negative stream).
    #[inline]
    pub fn is_server_event(&self) -> bool {
        self.stream < 0
    }
}
