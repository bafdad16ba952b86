//! Error types for colwire.

use thiserror::Error;

/// Main error type for all transport operations.
///
/// The taxonomy splits into per-request errors, which terminate a single
/// sink and leave the connection serviceable, and connection-fatal errors,
/// which tear down the socket and cancel every outstanding request:
///
/// - per-request: [`Protocol`](DriverError::Protocol),
///   [`Decode`](DriverError::Decode), [`Encode`](DriverError::Encode)
/// - connection-fatal: [`Io`](DriverError::Io), [`Frame`](DriverError::Frame),
///   [`UnexpectedStream`](DriverError::UnexpectedStream)
/// - terminal state: [`Cancelled`](DriverError::Cancelled)
#[derive(Debug, Error)]
pub enum DriverError {
    /// I/O error on the socket (read, write, or timeout expiry).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing violation: malformed header, oversized body, or a frame
    /// that does not carry the response direction bit. Recovery in place
    /// is impossible, so this is connection-fatal.
    #[error("framing error: {0}")]
    Frame(String),

    /// A response arrived for a stream id with no pending request.
    #[error("response for unexpected stream id {0}")]
    UnexpectedStream(i8),

    /// The server answered with an error frame.
    #[error("server error 0x{code:04x}: {message}")]
    Protocol { code: u32, message: String },

    /// A reader capability (or a wire primitive it used) failed on
    /// well-formed bytes.
    #[error("decode error: {0}")]
    Decode(String),

    /// A writer capability failed before anything was written to the
    /// socket. The request's stream id is never consumed.
    #[error("encode error: {0}")]
    Encode(String),

    /// The connection closed before the request completed, or the request
    /// was submitted to an already-closed connection.
    #[error("connection closed")]
    Cancelled,

    /// The server requires authentication but the configuration carries
    /// no credentials.
    #[error("server requires authentication but no credentials were configured")]
    InvalidCredentials,
}

impl DriverError {
    /// Whether this error tears down the whole connection rather than a
    /// single request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Io(_) | DriverError::Frame(_) | DriverError::UnexpectedStream(_)
        )
    }
}

/// Result type alias using DriverError.
pub type Result<T> = std::result::Result<T, DriverError>;
