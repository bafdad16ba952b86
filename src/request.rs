//! In-flight request descriptors.
//!
//! A [`RequestDescriptor`] is what travels through the admission queue
//! and sits in the pending table while a request is outstanding: the
//! caller's writer capability, and a delivery closure that fuses the
//! caller's reader capability with its sink. Erasing both behind boxed
//! closures keeps the connection free of type parameters while letting
//! each request decode into its own item type.
//!
//! The delivery closure is `FnOnce`, so every descriptor structurally
//! delivers exactly one terminal: a normal response drives the decoder
//! loop to `complete` or `error`, and the failure paths collapse to a
//! single `error` call.

use crate::error::{DriverError, Result};
use crate::frame::{FrameWriter, Opcode, ResponseFrame};
use crate::instrument::Token;
use crate::sink::ResponseSink;

/// What the read pump (or a failure path) hands to a descriptor.
pub(crate) enum Delivery<'a> {
    /// A well-framed response arrived for this request's stream id.
    Response(&'a mut ResponseFrame),
    /// The request terminates without a response.
    Fault(DriverError),
}

type WriteFn = Box<dyn FnOnce(&mut FrameWriter) -> Result<()> + Send>;
type DeliverFn = Box<dyn for<'a> FnOnce(Delivery<'a>) + Send>;

fn boxed_deliver<F>(deliver: F) -> DeliverFn
where
    F: for<'a> FnOnce(Delivery<'a>) + Send + 'static,
{
    Box::new(deliver)
}

/// The record pinned to a stream id while a request is in flight.
pub(crate) struct RequestDescriptor {
    write: Option<WriteFn>,
    deliver: DeliverFn,
    /// Caller-supplied correlation token for instrumentation events.
    pub token: Token,
}

impl RequestDescriptor {
    pub(crate) fn new<W, R, T, S>(write: W, mut read: R, token: Token, mut sink: S) -> Self
    where
        W: FnOnce(&mut FrameWriter) -> Result<()> + Send + 'static,
        R: FnMut(&mut ResponseFrame) -> Result<Option<T>> + Send + 'static,
        T: Send + 'static,
        S: ResponseSink<T> + 'static,
    {
        let deliver = boxed_deliver(move |delivery: Delivery<'_>| match delivery {
            Delivery::Fault(error) => sink.error(error),
            Delivery::Response(frame) => {
                if frame.opcode() == Opcode::Error {
                    // Server error frames are parsed here, before the
                    // user decoder ever sees the body.
                    sink.error(frame.parse_error());
                    return;
                }
                loop {
                    match read(frame) {
                        Ok(Some(item)) => sink.next(item),
                        Ok(None) => {
                            sink.complete();
                            break;
                        }
                        Err(error) => {
                            sink.error(error);
                            break;
                        }
                    }
                }
            }
        });

        Self {
            write: Some(Box::new(write)),
            deliver,
            token,
        }
    }

    /// Run the writer capability into `writer`.
    ///
    /// Consumes the capability; calling twice is a programming error.
    pub(crate) fn serialize(&mut self, writer: &mut FrameWriter) -> Result<()> {
        let write = self
            .write
            .take()
            .expect("writer capability already consumed");
        write(writer)
    }

    /// Deliver a response frame: decode items into the sink and finish
    /// with one terminal.
    pub(crate) fn respond(self, frame: &mut ResponseFrame) {
        (self.deliver)(Delivery::Response(frame));
    }

    /// Terminate the request without a response.
    pub(crate) fn fail(self, error: DriverError) {
        (self.deliver)(Delivery::Fault(error));
    }
}
