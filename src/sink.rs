//! Push-based response observers.
//!
//! Every request carries a sink: the read pump pushes each decoded item
//! through [`ResponseSink::next`] and finishes with exactly one terminal
//! call, either [`complete`](ResponseSink::complete) or
//! [`error`](ResponseSink::error). Nothing is delivered after a terminal.
//!
//! Two adapters cover the common shapes: [`ChannelSink`] turns the pushes
//! into an unbounded channel the caller drains as a lazy sequence, and
//! [`OneshotSink`] collects everything and resolves a single future
//! (used internally by the connection handshake).

use tokio::sync::{mpsc, oneshot};

use crate::error::DriverError;

/// Observer receiving one request's streamed result.
///
/// Contract: zero or more `next` calls, then exactly one of `complete` or
/// `error`, all invoked from the read pump (or the closing path). An
/// implementation must tolerate being dropped right after the terminal.
pub trait ResponseSink<T>: Send {
    /// One decoded item, in server-emitted order.
    fn next(&mut self, item: T);
    /// Terminal: the sequence ended normally.
    fn complete(&mut self);
    /// Terminal: the sequence ended with an error.
    fn error(&mut self, error: DriverError);
}

/// One delivery observed by a [`ChannelSink`] consumer.
#[derive(Debug)]
pub enum SinkEvent<T> {
    /// A decoded item.
    Item(T),
    /// Normal end of the sequence.
    Complete,
    /// Erroneous end of the sequence.
    Error(DriverError),
}

/// Sink adapter forwarding deliveries into an unbounded channel.
///
/// The consumer half yields the request's items as a finite sequence
/// ending in [`SinkEvent::Complete`] or [`SinkEvent::Error`]. A consumer
/// that has lost interest simply drops its receiver; subsequent pushes
/// are discarded and the request still runs to completion.
pub struct ChannelSink<T> {
    tx: mpsc::UnboundedSender<SinkEvent<T>>,
    terminated: bool,
}

impl<T> ChannelSink<T> {
    /// Create a sink and the receiver observing it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                terminated: false,
            },
            rx,
        )
    }

    fn push(&mut self, event: SinkEvent<T>) {
        debug_assert!(!self.terminated, "sink delivery after terminal");
        // A closed receiver means the caller abandoned the request.
        let _ = self.tx.send(event);
    }
}

impl<T: Send> ResponseSink<T> for ChannelSink<T> {
    fn next(&mut self, item: T) {
        self.push(SinkEvent::Item(item));
    }

    fn complete(&mut self) {
        self.push(SinkEvent::Complete);
        self.terminated = true;
    }

    fn error(&mut self, error: DriverError) {
        self.push(SinkEvent::Error(error));
        self.terminated = true;
    }
}

/// Sink adapter collecting the whole sequence into one result.
///
/// Resolves the paired [`oneshot::Receiver`] with `Ok(items)` on
/// completion or `Err(error)` on the error terminal.
pub struct OneshotSink<T> {
    items: Vec<T>,
    tx: Option<oneshot::Sender<Result<Vec<T>, DriverError>>>,
}

impl<T> OneshotSink<T> {
    /// Create a sink and the future observing its terminal.
    pub fn new() -> (Self, oneshot::Receiver<Result<Vec<T>, DriverError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                items: Vec::new(),
                tx: Some(tx),
            },
            rx,
        )
    }
}

impl<T: Send> ResponseSink<T> for OneshotSink<T> {
    fn next(&mut self, item: T) {
        self.items.push(item);
    }

    fn complete(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(std::mem::take(&mut self.items)));
        }
    }

    fn error(&mut self, error: DriverError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers_items_then_complete() {
        let (mut sink, mut rx) = ChannelSink::new();
        sink.next(1u32);
        sink.next(2);
        sink.complete();

        assert!(matches!(rx.try_recv().unwrap(), SinkEvent::Item(1)));
        assert!(matches!(rx.try_recv().unwrap(), SinkEvent::Item(2)));
        assert!(matches!(rx.try_recv().unwrap(), SinkEvent::Complete));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_error_terminal() {
        let (mut sink, mut rx) = ChannelSink::<u32>::new();
        sink.error(DriverError::Cancelled);

        assert!(matches!(
            rx.try_recv().unwrap(),
            SinkEvent::Error(DriverError::Cancelled)
        ));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::new();
        drop(rx);
        // The caller abandoned the request; deliveries are discarded.
        sink.next(42u32);
        sink.complete();
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "after terminal")]
    fn test_channel_sink_asserts_single_terminal() {
        let (mut sink, _rx) = ChannelSink::<u32>::new();
        sink.complete();
        sink.complete();
    }

    #[tokio::test]
    async fn test_oneshot_sink_collects_items() {
        let (mut sink, rx) = OneshotSink::new();
        sink.next("a");
        sink.next("b");
        sink.complete();

        assert_eq!(rx.await.unwrap().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_oneshot_sink_error_discards_items() {
        let (mut sink, rx) = OneshotSink::new();
        sink.next(1u8);
        sink.error(DriverError::Cancelled);

        assert!(matches!(rx.await.unwrap(), Err(DriverError::Cancelled)));
    }
}
