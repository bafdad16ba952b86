//! # colwire
//!
//! Transport core of a client driver for a distributed wide-column
//! datastore speaking a length-prefixed binary protocol over TCP.
//!
//! The unit of the crate is the [`Connection`]: one long-lived socket
//! multiplexing up to 128 concurrently outstanding requests, each tagged
//! with a one-byte stream id. Callers submit a request as a pair of
//! opaque capabilities (a writer that serializes the body into a
//! [`FrameWriter`], and a reader that decodes items out of a
//! [`ResponseFrame`]) plus a [`ResponseSink`] that receives the decoded
//! items as a push stream ending in exactly one terminal.
//!
//! ## Architecture
//!
//! - **Write pump**: drains the admission queue, acquires a stream id
//!   (the 128-id pool is the connection's only backpressure), records
//!   the request in the pending table, writes the frame.
//! - **Read pump**: reads each response frame in full, releases the
//!   stream id before user decoding, pushes items into the sink.
//! - **Failure atomicity**: any socket fault cancels every outstanding
//!   request, rejects new ones, and notifies the supervising cluster
//!   layer exactly once.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use colwire::{ChannelSink, Connection, ConnectionConfig, NoopInstrumentation, Opcode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), colwire::DriverError> {
//!     let config = ConnectionConfig::default();
//!     let conn = Connection::open(
//!         "127.0.0.1".parse().unwrap(),
//!         &config,
//!         Arc::new(NoopInstrumentation),
//!     )
//!     .await?;
//!
//!     let (sink, mut rows) = ChannelSink::new();
//!     conn.execute(
//!         |w| {
//!             w.set_opcode(Opcode::Query);
//!             w.write_long_string("SELECT peer FROM system.peers")?;
//!             w.write_u16(0x0001)
//!         },
//!         |frame| {
//!             if frame.body.is_empty() {
//!                 Ok(None)
//!             } else {
//!                 frame.body.read_bytes().map(Some)
//!             }
//!         },
//!         1,
//!         sink,
//!     )?;
//!
//!     while let Some(event) = rows.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod instrument;
pub mod sink;

mod connection;
mod pending;
mod pool;
mod request;

pub use config::ConnectionConfig;
pub use connection::Connection;
pub use error::{DriverError, Result};
pub use frame::{FrameBody, FrameHeader, FrameWriter, Opcode, ResponseFrame};
pub use instrument::{Instrumentation, NoopInstrumentation, Token, TracingInstrumentation};
pub use pool::StreamIdPool;
pub use sink::{ChannelSink, OneshotSink, ResponseSink, SinkEvent};
