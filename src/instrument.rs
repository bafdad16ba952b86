//! Instrumentation hooks for per-request trace events.
//!
//! The connection reports the lifecycle of every frame it moves, tagged
//! with the caller's correlation token: write begin/end from the write
//! pump, read begin/end from the read pump, cancellation from the
//! closing path. Implementations must be cheap and non-blocking; they
//! run on the pump tasks.

use uuid::Uuid;

/// Opaque request-correlation identifier carried through trace events.
pub type Token = u64;

/// Observer of per-request transport events.
pub trait Instrumentation: Send + Sync {
    /// The write pump is about to put the frame on the socket.
    fn write_started(&self, token: Token);
    /// The frame has been fully written.
    fn write_ended(&self, token: Token);
    /// A response frame for this request has been read off the socket.
    fn read_started(&self, token: Token);
    /// The response has been fully delivered to the sink.
    fn read_ended(&self, token: Token);
    /// The request was cancelled by the closing path.
    fn cancelled(&self, token: Token);
    /// The server attached a trace session id to the response.
    fn server_trace(&self, token: Token, trace_id: Uuid) {
        let _ = (token, trace_id);
    }
}

/// Instrumentation that discards every event.
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {
    fn write_started(&self, _token: Token) {}
    fn write_ended(&self, _token: Token) {}
    fn read_started(&self, _token: Token) {}
    fn read_ended(&self, _token: Token) {}
    fn cancelled(&self, _token: Token) {}
}

/// Instrumentation that emits `tracing` events at TRACE level.
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn write_started(&self, token: Token) {
        tracing::trace!(token, "frame write started");
    }

    fn write_ended(&self, token: Token) {
        tracing::trace!(token, "frame write ended");
    }

    fn read_started(&self, token: Token) {
        tracing::trace!(token, "frame read started");
    }

    fn read_ended(&self, token: Token) {
        tracing::trace!(token, "frame read ended");
    }

    fn cancelled(&self, token: Token) {
        tracing::trace!(token, "request cancelled");
    }

    fn server_trace(&self, token: Token, trace_id: Uuid) {
        tracing::trace!(token, %trace_id, "server trace session");
    }
}
