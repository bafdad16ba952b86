//! Response frame reading.
//!
//! [`read_frame`] pulls the fixed header off the socket, validates it,
//! and reads the declared body fully before returning. Reading the body
//! to completion up front is what keeps the stream frame-aligned no
//! matter what the user decoder later does with the bytes.
//!
//! The receive timeout deliberately does not cover waiting for a frame to
//! begin: an idle connection with nothing outstanding is healthy. Once
//! the first byte of a header has arrived the rest of the frame must
//! follow within the timeout, otherwise the read fails and the
//! connection is torn down.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use super::body::FrameBody;
use super::header::{FrameHeader, Opcode, HEADER_SIZE};
use crate::error::{DriverError, Result};

/// A fully-read response frame.
///
/// Reader capabilities receive one of these: the header fields for
/// dispatch decisions (opcode), the trace id if the server attached one,
/// and the bounded [`FrameBody`] holding the payload.
#[derive(Debug)]
pub struct ResponseFrame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Trace session id, present when the response carries the tracing
    /// flag. Already stripped from the body.
    pub trace_id: Option<Uuid>,
    /// Bounded cursor over the remaining body bytes.
    pub body: FrameBody,
}

impl ResponseFrame {
    /// Frame opcode.
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    /// Stream id this response belongs to.
    #[inline]
    pub fn stream(&self) -> i8 {
        self.header.stream
    }

    /// Assemble a frame from a validated header and its full body,
    /// extracting the trace id when the tracing flag is set.
    pub(crate) fn parse(header: FrameHeader, body: Bytes) -> Result<Self> {
        let mut body = FrameBody::new(body);
        let trace_id = if header.has_tracing() {
            Some(
                body.read_uuid()
                    .map_err(|_| DriverError::Frame("traced response too short for uuid".into()))?,
            )
        } else {
            None
        };
        Ok(Self {
            header,
            trace_id,
            body,
        })
    }

    /// Parse an `Error`-opcode body into the typed per-request error.
    ///
    /// Called before any user decoding; a body that does not follow the
    /// `i32 code + [string] message` layout still produces a `Protocol`
    /// error, with a placeholder message.
    pub(crate) fn parse_error(&mut self) -> DriverError {
        let code = self.body.read_i32().unwrap_or(-1) as u32;
        let message = self
            .body
            .read_string()
            .unwrap_or_else(|_| "malformed error body".to_string());
        DriverError::Protocol { code, message }
    }
}

/// Read one response frame, applying `receive_timeout` to everything
/// after the first header byte.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    receive_timeout: Option<Duration>,
) -> Result<ResponseFrame>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_SIZE];

    // Idle wait: no timeout until a frame starts arriving.
    reader.read_exact(&mut header_bytes[..1]).await?;

    let frame = async {
        reader.read_exact(&mut header_bytes[1..]).await?;
        let header = FrameHeader::decode(&header_bytes)?;
        header.validate_response()?;

        let mut body = vec![0u8; header.length as usize];
        reader.read_exact(&mut body).await?;
        ResponseFrame::parse(header, Bytes::from(body))
    };

    match receive_timeout {
        Some(timeout) if !timeout.is_zero() => tokio::time::timeout(timeout, frame)
            .await
            .map_err(|_| {
                DriverError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out reading response frame",
                ))
            })?,
        _ => frame.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::header::{flags, DIRECTION_RESPONSE, PROTOCOL_VERSION};
    use tokio::io::AsyncWriteExt;

    fn response_bytes(header_flags: u8, stream: i8, opcode: Opcode, body: &[u8]) -> Vec<u8> {
        let header = FrameHeader {
            version: PROTOCOL_VERSION | DIRECTION_RESPONSE,
            flags: header_flags,
            stream,
            opcode,
            length: body.len() as u32,
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    #[tokio::test]
    async fn test_read_complete_frame() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(&response_bytes(0, 5, Opcode::Result, b"pong"))
            .await
            .unwrap();

        let mut frame = read_frame(&mut rx, None).await.unwrap();
        assert_eq!(frame.stream(), 5);
        assert_eq!(frame.opcode(), Opcode::Result);
        assert_eq!(frame.trace_id, None);
        assert_eq!(frame.body.read_raw(4).unwrap(), &b"pong"[..]);
    }

    #[tokio::test]
    async fn test_request_direction_rejected() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let header = FrameHeader::request(0, 1, Opcode::Result, 0);
        tx.write_all(&header.encode()).await.unwrap();

        let result = read_frame(&mut rx, None).await;
        assert!(matches!(result, Err(DriverError::Frame(_))));
    }

    #[tokio::test]
    async fn test_truncated_body_is_io_error() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let mut bytes = response_bytes(0, 1, Opcode::Result, b"full body");
        bytes.truncate(bytes.len() - 3);
        tx.write_all(&bytes).await.unwrap();
        drop(tx);

        let result = read_frame(&mut rx, None).await;
        assert!(matches!(result, Err(DriverError::Io(_))));
    }

    #[tokio::test]
    async fn test_trace_id_extracted_before_body() {
        let uuid = Uuid::from_u128(0xDEAD_BEEF_DEAD_BEEF_DEAD_BEEF_DEAD_BEEF);
        let mut body = uuid.as_bytes().to_vec();
        body.extend_from_slice(b"rows");

        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(&response_bytes(flags::TRACING, 3, Opcode::Result, &body))
            .await
            .unwrap();

        let mut frame = read_frame(&mut rx, None).await.unwrap();
        assert_eq!(frame.trace_id, Some(uuid));
        assert_eq!(frame.body.read_raw(4).unwrap(), &b"rows"[..]);
        assert!(frame.body.is_empty());
    }

    #[tokio::test]
    async fn test_error_frame_parses_code_and_message() {
        let mut body = 0x2200i32.to_be_bytes().to_vec();
        body.extend_from_slice(&[0x00, 0x03]);
        body.extend_from_slice(b"bad");

        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(&response_bytes(0, 2, Opcode::Error, &body))
            .await
            .unwrap();

        let mut frame = read_frame(&mut rx, None).await.unwrap();
        match frame.parse_error() {
            DriverError::Protocol { code, message } => {
                assert_eq!(code, 0x2200);
                assert_eq!(message, "bad");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_receive_timeout_on_stalled_body() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        // Header promising 100 bytes, body never sent.
        let header = FrameHeader {
            version: PROTOCOL_VERSION | DIRECTION_RESPONSE,
            flags: 0,
            stream: 1,
            opcode: Opcode::Result,
            length: 100,
        };
        tx.write_all(&header.encode()).await.unwrap();

        let result = read_frame(&mut rx, Some(Duration::from_millis(20))).await;
        match result {
            Err(DriverError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_timeout_while_idle() {
        let (tx, mut rx) = tokio::io::duplex(1024);

        // Nothing written: read_frame must still be pending well past the
        // receive timeout, because the timeout only starts with a frame.
        let pending = read_frame(&mut rx, Some(Duration::from_millis(10)));
        tokio::select! {
            _ = pending => panic!("idle read should not resolve"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        drop(tx);
    }
}
