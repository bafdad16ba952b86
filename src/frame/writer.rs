//! Request frame assembly.
//!
//! [`FrameWriter`] buffers a request body in memory behind an 8-byte
//! header placeholder so the stream id and body length can be back-filled
//! once they are known. [`FrameWriter::finish`] yields one contiguous
//! buffer, so the socket sees the whole frame in a single write and the
//! peer can never observe a torn header.
//!
//! # Example
//!
//! ```
//! use colwire::frame::{FrameWriter, Opcode, HEADER_SIZE};
//!
//! let mut writer = FrameWriter::new(Opcode::Query);
//! writer.write_long_string("SELECT * FROM system.local").unwrap();
//! writer.write_u16(0x0001).unwrap();
//!
//! let frame = writer.finish(7);
//! assert_eq!(frame[2], 7); // stream id back-filled
//! assert!(frame.len() > HEADER_SIZE);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::header::{flags, FrameHeader, Opcode, HEADER_SIZE};
use crate::error::{DriverError, Result};

/// Buffered writer for a single request frame.
///
/// Writer capabilities receive one of these, declare the opcode and
/// optional tracing flag, and serialize the request body through the
/// typed primitives. The connection supplies the stream id at send time.
pub struct FrameWriter {
    /// Header placeholder followed by the body.
    buf: BytesMut,
    opcode: Opcode,
    tracing: bool,
}

impl FrameWriter {
    /// Create a writer for a frame with the given opcode.
    pub fn new(opcode: Opcode) -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.resize(HEADER_SIZE, 0);
        Self {
            buf,
            opcode,
            tracing: false,
        }
    }

    /// Replace the opcode declared at construction.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.opcode = opcode;
    }

    /// Request server-side tracing for this frame. Sets the tracing bit
    /// in the header flags.
    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    /// Whether tracing was requested.
    #[inline]
    pub fn tracing(&self) -> bool {
        self.tracing
    }

    /// Current body length in bytes.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.buf.len() - HEADER_SIZE
    }

    /// Write a raw byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.buf.put_u8(value);
        Ok(())
    }

    /// Write a Big Endian u16.
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.buf.put_u16(value);
        Ok(())
    }

    /// Write a Big Endian u32.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.buf.put_u32(value);
        Ok(())
    }

    /// Write a Big Endian i32.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.buf.put_i32(value);
        Ok(())
    }

    /// Write a Big Endian i64.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.buf.put_i64(value);
        Ok(())
    }

    /// Write raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Write a `[string]`: u16 length followed by UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len())
            .map_err(|_| DriverError::Encode(format!("string of {} bytes too long", value.len())))?;
        self.buf.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Write a `[long string]`: i32 length followed by UTF-8 bytes.
    pub fn write_long_string(&mut self, value: &str) -> Result<()> {
        let len = i32::try_from(value.len()).map_err(|_| {
            DriverError::Encode(format!("long string of {} bytes too long", value.len()))
        })?;
        self.buf.put_i32(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Write a `[bytes]` value: i32 length followed by raw bytes, or
    /// length -1 for `None`.
    pub fn write_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| {
                    DriverError::Encode(format!("byte value of {} bytes too long", bytes.len()))
                })?;
                self.buf.put_i32(len);
                self.buf.put_slice(bytes);
            }
            None => self.buf.put_i32(-1),
        }
        Ok(())
    }

    /// Write a `[string map]`: u16 pair count followed by string pairs.
    pub fn write_string_map<'a, I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let pairs: Vec<_> = pairs.into_iter().collect();
        let count = u16::try_from(pairs.len())
            .map_err(|_| DriverError::Encode(format!("string map of {} entries", pairs.len())))?;
        self.buf.put_u16(count);
        for (key, value) in pairs {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    /// Back-fill the header and return the finished frame as one
    /// contiguous buffer.
    ///
    /// The write pump supplies the stream id at send time; the method is
    /// public for protocol tooling and scripted test peers.
    pub fn finish(mut self, stream: i8) -> Bytes {
        let body_len = self.body_len() as u32;
        let header_flags = if self.tracing { flags::TRACING } else { 0 };
        let header = FrameHeader::request(header_flags, stream, self.opcode, body_len);
        self.buf[..HEADER_SIZE].copy_from_slice(&header.encode());
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::header::PROTOCOL_VERSION;

    fn finished_header(writer: FrameWriter, stream: i8) -> (FrameHeader, Bytes) {
        let frame = writer.finish(stream);
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&frame[..HEADER_SIZE]);
        (FrameHeader::decode(&header_bytes).unwrap(), frame)
    }

    #[test]
    fn test_finish_backfills_stream_and_length() {
        let mut writer = FrameWriter::new(Opcode::Query);
        writer.write_long_string("ping").unwrap();

        let (header, frame) = finished_header(writer, 42);
        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.stream, 42);
        assert_eq!(header.opcode, Opcode::Query);
        assert_eq!(header.length as usize, frame.len() - HEADER_SIZE);
        assert_eq!(header.length, 8); // i32 length prefix + "ping"
    }

    #[test]
    fn test_empty_body() {
        let writer = FrameWriter::new(Opcode::Options);
        let (header, frame) = finished_header(writer, 0);
        assert_eq!(header.length, 0);
        assert_eq!(frame.len(), HEADER_SIZE);
    }

    #[test]
    fn test_tracing_flag_set_in_header() {
        let mut writer = FrameWriter::new(Opcode::Query);
        writer.enable_tracing();
        let (header, _) = finished_header(writer, 1);
        assert!(header.has_tracing());
    }

    #[test]
    fn test_write_string_layout() {
        let mut writer = FrameWriter::new(Opcode::Startup);
        writer.write_string("ab").unwrap();
        let frame = writer.finish(0);
        assert_eq!(&frame[HEADER_SIZE..], &[0x00, 0x02, b'a', b'b']);
    }

    #[test]
    fn test_write_string_map_layout() {
        let mut writer = FrameWriter::new(Opcode::Startup);
        writer.write_string_map([("CQL_VERSION", "3.0.0")]).unwrap();
        let frame = writer.finish(0);

        let body = &frame[HEADER_SIZE..];
        assert_eq!(&body[..2], &[0x00, 0x01]); // one pair
        assert_eq!(&body[2..4], &[0x00, 0x0B]); // key length
        assert_eq!(&body[4..15], b"CQL_VERSION");
        assert_eq!(&body[15..17], &[0x00, 0x05]); // value length
        assert_eq!(&body[17..], b"3.0.0");
    }

    #[test]
    fn test_write_bytes_null_encoding() {
        let mut writer = FrameWriter::new(Opcode::Execute);
        writer.write_bytes(None).unwrap();
        let frame = writer.finish(0);
        assert_eq!(&frame[HEADER_SIZE..], &(-1i32).to_be_bytes());
    }

    #[test]
    fn test_write_bytes_length_prefix() {
        let mut writer = FrameWriter::new(Opcode::Execute);
        writer.write_bytes(Some(b"xyz")).unwrap();
        let frame = writer.finish(0);
        assert_eq!(&frame[HEADER_SIZE..HEADER_SIZE + 4], &3i32.to_be_bytes());
        assert_eq!(&frame[HEADER_SIZE + 4..], b"xyz");
    }

    #[test]
    fn test_oversized_string_rejected() {
        let mut writer = FrameWriter::new(Opcode::Query);
        let huge = "x".repeat(u16::MAX as usize + 1);
        let result = writer.write_string(&huge);
        assert!(matches!(result, Err(DriverError::Encode(_))));
    }

    #[test]
    fn test_negative_stream_id_backfill() {
        // The transport never sends negative ids, but the codec must not
        // mangle the two's complement byte.
        let writer = FrameWriter::new(Opcode::Register);
        let (header, _) = finished_header(writer, -1);
        assert_eq!(header.stream, -1);
    }
}
