//! The per-endpoint multiplexing connection.
//!
//! One long-lived TCP socket carries up to 128 concurrently outstanding
//! requests, each tagged with a stream id. Two pump tasks own the socket
//! halves:
//!
//! ```text
//! Caller 1 ─┐                                      ┌─► Sink 1
//! Caller 2 ─┼─► queue ─► WritePump ─► TCP ─► ReadPump ─► Sink 2
//! Caller N ─┘      (acquire id,                (take descriptor,
//!                   pend, write)                release id, decode)
//! ```
//!
//! The write pump dequeues a request, serializes it, acquires a stream
//! id, records the descriptor in the pending table and only then writes
//! the frame, so a response can never arrive before its descriptor is
//! visible. The read pump takes the descriptor, releases the id before
//! running the user decoder, and drives the sink to exactly one terminal.
//!
//! Any I/O fault observed by either pump closes the connection: every
//! outstanding and queued request fails with `Cancelled`, new admissions
//! are rejected, and failure subscribers are notified exactly once. The
//! supervising cluster layer reacts by opening a fresh connection to
//! another endpoint; nothing is retried here.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{DriverError, Result};
use crate::frame::{read_frame, FrameWriter, Opcode, ResponseFrame};
use crate::instrument::{Instrumentation, Token};
use crate::pending::PendingTable;
use crate::pool::StreamIdPool;
use crate::request::RequestDescriptor;
use crate::sink::{OneshotSink, ResponseSink};

/// Keepalive probe interval applied when keepalive idle time is set.
const KEEPALIVE_PROBE_INTERVAL: Duration = Duration::from_millis(1000);

type FailureListener = Box<dyn FnOnce(Arc<DriverError>) + Send>;

/// Admission state: guarded by one mutex so a close and a concurrent
/// `execute` agree on whether the request was accepted.
struct Admission {
    closed: bool,
    queue: Option<mpsc::UnboundedSender<RequestDescriptor>>,
}

struct Shared {
    addr: SocketAddr,
    admission: Mutex<Admission>,
    pending: PendingTable,
    pool: StreamIdPool,
    shutdown: watch::Sender<bool>,
    failure_listeners: Mutex<Vec<FailureListener>>,
    instrumentation: Arc<dyn Instrumentation>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl Shared {
    /// Flip to closed. Returns false if another path got there first.
    fn begin_close(&self) -> bool {
        let mut admission = self.admission.lock().unwrap();
        if admission.closed {
            return false;
        }
        admission.closed = true;
        // Dropping the sender lets the write pump drain and cancel
        // whatever was admitted but never written.
        admission.queue = None;
        true
    }

    /// The single closing path. Idempotent; the first caller wins.
    ///
    /// Wakes both pumps, cancels every in-flight request, and, when the
    /// close was caused by a fault, notifies failure subscribers.
    /// Subscribers are cleared either way to break reference cycles.
    fn shut_down(&self, failure: Option<DriverError>) {
        if !self.begin_close() {
            return;
        }

        let _ = self.shutdown.send(true);
        self.pool.close();

        for descriptor in self.pending.drain() {
            self.instrumentation.cancelled(descriptor.token);
            descriptor.fail(DriverError::Cancelled);
        }

        let listeners = std::mem::take(&mut *self.failure_listeners.lock().unwrap());
        if let Some(error) = failure {
            warn!(addr = %self.addr, %error, "connection failed");
            let error = Arc::new(error);
            for listener in listeners {
                listener(Arc::clone(&error));
            }
        } else {
            debug!(addr = %self.addr, "connection closed");
        }
    }

    fn fault(&self, error: DriverError) {
        self.shut_down(Some(error));
    }

    fn is_closed(&self) -> bool {
        self.admission.lock().unwrap().closed
    }
}

/// A ready connection to one endpoint.
///
/// Dropping the connection behaves like [`Connection::close`].
pub struct Connection {
    shared: Arc<Shared>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Connect, configure the socket, start both pumps, and run the
    /// handshake. The pumps are running before the handshake is issued
    /// because the handshake itself goes through [`Connection::execute`].
    ///
    /// On handshake failure the connection is torn down; both pump
    /// tasks have exited by the time the error is returned.
    pub async fn open(
        addr: IpAddr,
        config: &ConnectionConfig,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Result<Connection> {
        let socket_addr = SocketAddr::new(addr, config.port);
        debug!(addr = %socket_addr, "connecting");

        let stream = TcpStream::connect(socket_addr).await?;
        configure_socket(&stream, config)?;
        let (read_half, write_half) = stream.into_split();

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            addr: socket_addr,
            admission: Mutex::new(Admission {
                closed: false,
                queue: Some(queue_tx),
            }),
            pending: PendingTable::new(),
            pool: StreamIdPool::new(),
            shutdown: shutdown_tx,
            failure_listeners: Mutex::new(Vec::new()),
            instrumentation,
            send_timeout: config.send_timeout(),
            receive_timeout: config.receive_timeout(),
        });

        let write_task = tokio::spawn(write_pump(
            Arc::clone(&shared),
            queue_rx,
            write_half,
            shutdown_rx.clone(),
        ));
        let read_task = tokio::spawn(read_pump(Arc::clone(&shared), read_half, shutdown_rx));

        let connection = Connection {
            shared,
            pumps: Mutex::new(vec![write_task, read_task]),
        };

        if let Err(error) = connection.handshake(config).await {
            connection.shared.shut_down(None);
            connection.join_pumps().await;
            return Err(error);
        }

        debug!(addr = %socket_addr, "connection ready");
        Ok(connection)
    }

    /// Submit a request.
    ///
    /// `write` serializes the request body and declares its opcode (the
    /// [`FrameWriter`] defaults to [`Opcode::Query`]) and tracing flag.
    /// `read` decodes the response body into items, returning `Ok(None)`
    /// at the end of the sequence; it never sees `Error`-opcode frames,
    /// which terminate the sink with
    /// [`Protocol`](DriverError::Protocol) before user decoding. Items
    /// and the final terminal are pushed into `sink` by the read pump.
    ///
    /// Admission never waits for a stream id or the socket; it can block
    /// only briefly on the admission mutex. Fails with
    /// [`Cancelled`](DriverError::Cancelled) once the connection is
    /// closed (the sink receives the same terminal).
    pub fn execute<W, R, T, S>(&self, write: W, read: R, token: Token, sink: S) -> Result<()>
    where
        W: FnOnce(&mut FrameWriter) -> Result<()> + Send + 'static,
        R: FnMut(&mut ResponseFrame) -> Result<Option<T>> + Send + 'static,
        T: Send + 'static,
        S: ResponseSink<T> + 'static,
    {
        let descriptor = RequestDescriptor::new(write, read, token, sink);

        let rejected = {
            let admission = self.shared.admission.lock().unwrap();
            match &admission.queue {
                Some(queue) if !admission.closed => {
                    queue.send(descriptor).err().map(|rejected| rejected.0)
                }
                _ => Some(descriptor),
            }
        };

        match rejected {
            None => Ok(()),
            Some(descriptor) => {
                descriptor.fail(DriverError::Cancelled);
                Err(DriverError::Cancelled)
            }
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Every accepted, not-yet-terminated request fails with
    /// [`Cancelled`](DriverError::Cancelled); subsequent
    /// [`execute`](Connection::execute) calls are rejected. Failure
    /// subscribers are not notified by an explicit close.
    pub fn close(&self) {
        self.shared.shut_down(None);
    }

    /// Register a supervisor notification for connection failure.
    ///
    /// Fires at most once, only when a pump observes an I/O fault (not
    /// on explicit [`close`](Connection::close)). A listener registered
    /// after the connection closed is dropped without being called.
    pub fn on_failure(&self, listener: impl FnOnce(Arc<DriverError>) + Send + 'static) {
        if self.shared.is_closed() {
            return;
        }
        self.shared
            .failure_listeners
            .lock()
            .unwrap()
            .push(Box::new(listener));
    }

    /// Whether the connection has reached its terminal `Closed` state.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of stream ids currently free. 128 on a quiescent
    /// connection; supervisors use this as a load signal.
    pub fn available_stream_ids(&self) -> usize {
        self.shared.pool.available()
    }

    /// Number of requests currently in flight: written to the socket but
    /// not yet terminally delivered. Complements
    /// [`available_stream_ids`](Connection::available_stream_ids); at
    /// quiescence the two sum to 128.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Remote endpoint this connection is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    async fn join_pumps(&self) {
        let pumps = std::mem::take(&mut *self.pumps.lock().unwrap());
        for pump in pumps {
            let _ = pump.await;
        }
    }

    /// Issue one request and wait for its single response item.
    async fn request_one<W, R, T>(&self, write: W, read: R) -> Result<T>
    where
        W: FnOnce(&mut FrameWriter) -> Result<()> + Send + 'static,
        R: FnMut(&mut ResponseFrame) -> Result<Option<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (sink, receiver) = OneshotSink::new();
        self.execute(write, read, 0, sink)?;
        let mut items = receiver.await.map_err(|_| DriverError::Cancelled)??;
        items
            .pop()
            .ok_or_else(|| DriverError::Decode("empty handshake response".into()))
    }

    /// Startup exchange, optionally followed by credentials.
    ///
    /// `Startup` must be answered with `Ready` (done) or `Authenticate`
    /// (credentials required). Both exchanges go through the pumps like
    /// any other request.
    async fn handshake(&self, config: &ConnectionConfig) -> Result<()> {
        let cql_version = config.cql_version.clone();
        let auth_required = self
            .request_one(
                move |writer: &mut FrameWriter| {
                    writer.set_opcode(Opcode::Startup);
                    writer.write_string_map([("CQL_VERSION", cql_version.as_str())])
                },
                single_response(|frame: &mut ResponseFrame| match frame.opcode() {
                    Opcode::Ready => Ok(false),
                    Opcode::Authenticate => {
                        let authenticator = frame.body.read_string()?;
                        trace!(%authenticator, "server requested authentication");
                        Ok(true)
                    }
                    other => Err(DriverError::Decode(format!(
                        "unexpected startup response {other:?}"
                    ))),
                }),
            )
            .await?;

        if auth_required {
            let (user, password) = match (&config.user, &config.password) {
                (Some(user), Some(password)) => (user.clone(), password.clone()),
                _ => return Err(DriverError::InvalidCredentials),
            };

            self.request_one(
                move |writer: &mut FrameWriter| {
                    writer.set_opcode(Opcode::Credentials);
                    writer.write_string_map([
                        ("username", user.as_str()),
                        ("password", password.as_str()),
                    ])
                },
                single_response(|frame: &mut ResponseFrame| match frame.opcode() {
                    Opcode::Ready => Ok(()),
                    other => Err(DriverError::Decode(format!(
                        "unexpected credentials response {other:?}"
                    ))),
                }),
            )
            .await?;
        }

        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.shut_down(None);
    }
}

/// Adapt a decode-the-whole-frame closure into the one-item-sequence
/// shape of a reader capability.
fn single_response<T, F>(mut decode: F) -> impl FnMut(&mut ResponseFrame) -> Result<Option<T>> + Send
where
    F: FnMut(&mut ResponseFrame) -> Result<T> + Send,
{
    let mut done = false;
    move |frame| {
        if done {
            return Ok(None);
        }
        done = true;
        decode(frame).map(Some)
    }
}

/// TCP_NODELAY on, linger zero, keepalive per configuration with the
/// probe interval fixed at one second.
fn configure_socket(stream: &TcpStream, config: &ConnectionConfig) -> Result<()> {
    stream.set_nodelay(true)?;

    let sock = SockRef::from(stream);
    sock.set_linger(Some(Duration::ZERO))?;

    if config.keepalive {
        if let Some(idle) = config.keepalive_time() {
            let keepalive = TcpKeepalive::new()
                .with_time(idle)
                .with_interval(KEEPALIVE_PROBE_INTERVAL);
            sock.set_tcp_keepalive(&keepalive)?;
        } else {
            sock.set_keepalive(true)?;
        }
    } else {
        sock.set_keepalive(false)?;
    }

    Ok(())
}

/// Single writer worker: drains the queue, frames each request, and
/// writes it after its descriptor is pending.
async fn write_pump(
    shared: Arc<Shared>,
    mut queue: mpsc::UnboundedReceiver<RequestDescriptor>,
    mut socket: OwnedWriteHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut descriptor = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = queue.recv() => match next {
                Some(descriptor) => descriptor,
                None => break,
            },
        };

        let mut writer = FrameWriter::new(Opcode::Query);
        if let Err(error) = descriptor.serialize(&mut writer) {
            // Nothing reached the socket and no stream id was consumed:
            // the failure stays scoped to this one request.
            trace!(token = descriptor.token, %error, "writer capability failed");
            descriptor.fail(error);
            continue;
        }

        let id = match shared.pool.acquire().await {
            Ok(id) => id,
            Err(_) => {
                descriptor.fail(DriverError::Cancelled);
                break;
            }
        };

        let token = descriptor.token;
        let frame = writer.finish(id);

        // The descriptor must be visible to the read pump before the
        // first byte is written.
        shared.pending.put(id, descriptor);

        shared.instrumentation.write_started(token);
        let result = match shared.send_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, socket.write_all(&frame)).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out writing request frame",
                )),
            },
            None => socket.write_all(&frame).await,
        };

        match result {
            Ok(()) => shared.instrumentation.write_ended(token),
            Err(error) => {
                shared.fault(DriverError::Io(error));
                break;
            }
        }
    }

    // Cancel everything admitted but never written.
    queue.close();
    while let Ok(descriptor) = queue.try_recv() {
        shared.instrumentation.cancelled(descriptor.token);
        descriptor.fail(DriverError::Cancelled);
    }

    trace!(addr = %shared.addr, "write pump exited");
}

/// Single reader worker: demultiplexes response frames back to their
/// pending descriptors.
async fn read_pump(shared: Arc<Shared>, mut socket: OwnedReadHalf, mut shutdown: watch::Receiver<bool>) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            frame = read_frame(&mut socket, shared.receive_timeout) => frame,
        };

        let mut frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                shared.fault(error);
                break;
            }
        };

        let stream = frame.stream();
        if stream < 0 {
            // Reserved for server-initiated events; no routing defined.
            debug!(stream, "dropping server event frame");
            continue;
        }

        let Some(descriptor) = shared.pending.take(stream) else {
            shared.fault(DriverError::UnexpectedStream(stream));
            break;
        };

        // Release before decoding: a slow user decoder must not starve
        // admission. Safe because the slot above is already cleared.
        shared.pool.release(stream);

        let token = descriptor.token;
        shared.instrumentation.read_started(token);
        if let Some(trace_id) = frame.trace_id {
            shared.instrumentation.server_trace(token, trace_id);
        }
        descriptor.respond(&mut frame);
        shared.instrumentation.read_ended(token);
    }

    trace!(addr = %shared.addr, "read pump exited");
}
