//! Bounded reader over a response body.
//!
//! The read pump reads each body fully into memory before any user code
//! runs, so a [`FrameBody`] is a cursor over owned bytes: a decoder that
//! reads too little leaves bytes that are simply dropped with the frame,
//! and one that reads too much gets a clean [`DriverError::Decode`]. The
//! socket itself stays aligned on the next frame boundary either way.

use bytes::{Buf, Bytes};
use uuid::Uuid;

use crate::error::{DriverError, Result};

/// Cursor over the body of a single response frame.
///
/// Offers the same typed wire primitives as
/// [`FrameWriter`](crate::frame::FrameWriter), in read direction. All
/// reads are bounds-checked against the frame's declared length.
#[derive(Debug)]
pub struct FrameBody {
    buf: Bytes,
}

impl FrameBody {
    pub(crate) fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed by the decoder.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Whether the whole body has been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn check(&self, need: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < need {
            return Err(DriverError::Decode(format!(
                "body underflow reading {what}: need {need} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Read a raw byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.check(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    /// Read a Big Endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.check(2, "u16")?;
        Ok(self.buf.get_u16())
    }

    /// Read a Big Endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.check(4, "u32")?;
        Ok(self.buf.get_u32())
    }

    /// Read a Big Endian i32.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.check(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    /// Read a Big Endian i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.check(8, "i64")?;
        Ok(self.buf.get_i64())
    }

    /// Read `len` raw bytes (zero-copy slice of the body).
    pub fn read_raw(&mut self, len: usize) -> Result<Bytes> {
        self.check(len, "raw bytes")?;
        Ok(self.buf.split_to(len))
    }

    /// Read a `[string]`: u16 length followed by UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let raw = self.read_raw(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| DriverError::Decode(format!("string is not UTF-8: {e}")))
    }

    /// Read a `[long string]`: i32 length followed by UTF-8 bytes.
    pub fn read_long_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| DriverError::Decode(format!("negative long string length {len}")))?;
        let raw = self.read_raw(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| DriverError::Decode(format!("long string is not UTF-8: {e}")))
    }

    /// Read a `[bytes]` value: i32 length followed by raw bytes, with a
    /// negative length meaning `None`.
    pub fn read_bytes(&mut self) -> Result<Option<Bytes>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.read_raw(len as usize)?))
    }

    /// Read a `[string map]`: u16 pair count followed by string pairs.
    pub fn read_string_map(&mut self) -> Result<Vec<(String, String)>> {
        let count = self.read_u16()? as usize;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    /// Read a `[uuid]`: 16 raw bytes.
    pub fn read_uuid(&mut self) -> Result<Uuid> {
        let raw = self.read_raw(16).map_err(|_| {
            DriverError::Decode(format!(
                "body underflow reading uuid: need 16 bytes, have {}",
                self.remaining()
            ))
        })?;
        Uuid::from_slice(&raw).map_err(|e| DriverError::Decode(format!("bad uuid: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(bytes: &[u8]) -> FrameBody {
        FrameBody::new(Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn test_scalar_reads() {
        let mut b = body(&[0x01, 0x00, 0x02, 0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(b.read_u8().unwrap(), 1);
        assert_eq!(b.read_u16().unwrap(), 2);
        assert_eq!(b.read_i32().unwrap(), -2);
        assert!(b.is_empty());
    }

    #[test]
    fn test_read_string() {
        let mut b = body(&[0x00, 0x04, b'p', b'o', b'n', b'g']);
        assert_eq!(b.read_string().unwrap(), "pong");
        assert_eq!(b.remaining(), 0);
    }

    #[test]
    fn test_read_string_map() {
        let mut b = body(&[
            0x00, 0x01, // one pair
            0x00, 0x01, b'k', // key
            0x00, 0x01, b'v', // value
        ]);
        let pairs = b.read_string_map().unwrap();
        assert_eq!(pairs, vec![("k".to_string(), "v".to_string())]);
    }

    #[test]
    fn test_read_bytes_null() {
        let mut b = body(&(-1i32).to_be_bytes());
        assert_eq!(b.read_bytes().unwrap(), None);
    }

    #[test]
    fn test_read_bytes_present() {
        let mut b = body(&[0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB]);
        assert_eq!(b.read_bytes().unwrap().unwrap(), &[0xAA, 0xBB][..]);
    }

    #[test]
    fn test_overread_is_decode_error() {
        let mut b = body(&[0x01]);
        b.read_u8().unwrap();
        let result = b.read_u32();
        assert!(matches!(result, Err(DriverError::Decode(_))));
    }

    #[test]
    fn test_string_claiming_more_than_body() {
        // Length prefix says 10 bytes but only 2 follow.
        let mut b = body(&[0x00, 0x0A, b'x', b'y']);
        assert!(matches!(b.read_string(), Err(DriverError::Decode(_))));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut b = body(&[0x00, 0x02, 0xC3, 0x28]);
        assert!(matches!(b.read_string(), Err(DriverError::Decode(_))));
    }

    #[test]
    fn test_read_uuid() {
        let uuid = Uuid::from_u128(0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF);
        let mut b = body(uuid.as_bytes());
        assert_eq!(b.read_uuid().unwrap(), uuid);
    }

    #[test]
    fn test_underread_leaves_remaining() {
        let mut b = body(&[0x01, 0x02, 0x03, 0x04]);
        b.read_u8().unwrap();
        assert_eq!(b.remaining(), 3);
        // Dropping the body with bytes remaining is fine; the socket was
        // never exposed to the decoder.
    }
}
