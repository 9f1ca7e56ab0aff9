//! An embeddable, non-blocking HTTP/1.1 connection engine
//!
//! This crate implements the per-connection half of an HTTP/1.1 server: it
//! takes already-accepted sockets and drives each one through request
//! parsing, handler dispatch, and response transmission using strictly
//! non-blocking steps. It deliberately contains no accept loop, no poller,
//! and no runtime — the surrounding dispatcher (a `poll`/`epoll` event loop,
//! a worker pool, or one thread per connection) owns scheduling and calls
//! [`Connection::advance`] whenever a socket reports readiness.
//!
//! # Features
//!
//! - Full HTTP/1.1 request/response framing, keep-alive and pipelining
//! - Non-blocking state machine with explicit would-block semantics
//! - Write coalescing (corking) and vectored header+body sends
//! - Accelerated file-region transfer with transparent buffered fallback
//! - Chunked transfer encoding in both directions
//! - Expect/100-continue mechanism
//! - Bounded per-connection buffers with configurable limits
//! - Optional TLS transport behind the `tls` feature (rustls)
//!
//! # Example
//!
//! A minimal thread-per-connection deployment:
//!
//! ```no_run
//! use std::error::Error;
//! use std::net::TcpListener;
//! use std::time::Instant;
//!
//! use bytes::Bytes;
//! use http::{Response, StatusCode};
//! use tracing::{info, warn, Level};
//! use tracing_subscriber::FmtSubscriber;
//!
//! use h1_engine::connection::Step;
//! use h1_engine::handler::{make_handler, BodyEvent, Dispatch, ResponseBody};
//! use h1_engine::protocol::RequestHeader;
//! use h1_engine::transport::PlainTransport;
//! use h1_engine::{Engine, EngineConfig};
//!
//! fn main() -> Result<(), Box<dyn Error>> {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber)?;
//!
//!     let engine = Engine::new(EngineConfig::default().connection_limit(1024));
//!     let listener = TcpListener::bind("127.0.0.1:8080")?;
//!     info!(port = 8080, "start listening");
//!
//!     loop {
//!         let (stream, _remote_addr) = match listener.accept() {
//!             Ok(accepted) => accepted,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let transport = PlainTransport::new(stream)?;
//!         let mut connection = match engine.admit(transport, make_handler(hello_world)) {
//!             Ok(connection) => connection,
//!             Err(e) => {
//!                 warn!(cause = %e, "connection refused");
//!                 continue;
//!             }
//!         };
//!
//!         std::thread::spawn(move || loop {
//!             match connection.advance(Instant::now()) {
//!                 Step::Continue(_interest) => std::thread::yield_now(),
//!                 Step::Closed(reason) => {
//!                     info!(?reason, "connection shutdown");
//!                     break;
//!                 }
//!             }
//!         });
//!     }
//! }
//!
//! fn hello_world(
//!     request: &RequestHeader,
//!     event: BodyEvent<'_>,
//!     _context: &mut (),
//! ) -> Result<Dispatch, Box<dyn Error + Send + Sync>> {
//!     match event {
//!         BodyEvent::Headers => {
//!             info!(path = %request.uri().path(), "request");
//!             let response = Response::builder()
//!                 .status(StatusCode::OK)
//!                 .body(ResponseBody::Full(Bytes::from_static(b"Hello World!\r\n")))?;
//!             Ok(Dispatch::Respond(response))
//!         }
//!         _ => Ok(Dispatch::NeedBody),
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`transport`]: the non-blocking byte-channel abstraction, with a plain
//!   TCP implementation and an optional TLS one
//! - [`send`]: cork policy and transfer-path selection for one send episode
//! - [`buffer`]: the bounded per-connection read/write buffer pair
//! - [`codec`]: sans-io request decoding and response encoding
//! - [`connection`]: the state machine driven by readiness notifications
//! - [`handler`]: the application dispatch contract
//! - [`Engine`]: process-wide configuration, admission, and shutdown
//!
//! # Concurrency
//!
//! A `Connection` is owned by exactly one execution context at a time and
//! performs no internal locking; only the [`Engine`]'s admission counter is
//! shared. All deployment modes — one event loop, pooled pollers, or a
//! thread per connection — drive the same [`Connection::advance`] function.
//!
//! # Limitations
//!
//! - HTTP/1.1 (and 1.0) only; no HTTP/2 or HTTP/3 framing
//! - Default maximum header block: 8 KB, at most 64 header fields
//! - The accelerated file path requires a plain transport on Linux;
//!   everything else transparently uses the buffered copy

pub mod buffer;
pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod send;
pub mod transport;

mod engine;
mod utils;

pub use engine::{AdmitError, Engine, EngineConfig};

pub use connection::{Connection, Step, TerminationReason};

pub(crate) use utils::ensure;
