//! Byte-level duplex transport abstraction.
//!
//! A [`Transport`] is a non-blocking, byte-oriented channel to one peer: a
//! plain TCP socket ([`PlainTransport`]) or a TLS session over one
//! ([`TlsTransport`], behind the `tls` feature). The connection state machine
//! and the send optimizer are written purely against this trait, so the two
//! flavors share the whole engine.
//!
//! # Contract
//!
//! - No operation ever blocks. Work that cannot complete immediately is
//!   reported as [`IoStatus::WouldBlock`] and must be retried after the
//!   driver's next readiness notification.
//! - Partial sends are legal and expected: `send` and `send_vectored` may
//!   accept fewer bytes than offered, and the caller retries with the
//!   remainder.
//! - Interrupted system calls are retried internally, never surfaced.
//! - Fatal failures are sticky: once an operation returns a
//!   [`TransportError`], every later operation returns the same error until
//!   the transport is dropped.
//! - `shutdown` is idempotent and safe to call from any state, including
//!   error paths.

use std::fs::File;
use std::io;
use std::io::IoSlice;

use bytes::BytesMut;
use thiserror::Error;

mod plain;
pub use plain::PlainTransport;

#[cfg(feature = "tls")]
mod tls;
#[cfg(feature = "tls")]
pub use tls::TlsTransport;

/// Outcome of a non-blocking receive or send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// `n` bytes were transferred. For sends, `n` may be less than the number
    /// of bytes offered.
    Ready(usize),
    /// The operation cannot make progress right now; retry on readiness.
    WouldBlock,
    /// The peer performed an orderly close. Only produced by `receive`.
    Closed,
}

/// Outcome of an accelerated file-region send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSendStatus {
    /// `n` bytes were transferred directly from the file.
    Sent(usize),
    /// The socket cannot accept more data right now.
    WouldBlock,
    /// This transport (or platform) has no accelerated path; the caller must
    /// fall back to a buffered copy.
    Unsupported,
}

/// A fatal transport failure.
///
/// Cloneable so a dead transport can keep returning the failure that killed
/// it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection reset by peer")]
    Reset,

    #[error("broken pipe")]
    BrokenPipe,

    #[error("tls failure: {reason}")]
    Tls { reason: String },

    #[error("io error: {kind}")]
    Io { kind: io::ErrorKind },
}

impl TransportError {
    pub(crate) fn from_io(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Self::Reset,
            io::ErrorKind::BrokenPipe => Self::BrokenPipe,
            kind => Self::Io { kind },
        }
    }
}

/// A non-blocking duplex byte channel to one peer.
pub trait Transport {
    /// Pulls at most `max` bytes from the peer into `buf`.
    ///
    /// On an encrypted channel whose handshake needs more input this returns
    /// `WouldBlock` after feeding the handshake.
    fn receive(&mut self, buf: &mut BytesMut, max: usize) -> Result<IoStatus, TransportError>;

    /// Pushes bytes towards the peer, possibly partially.
    fn send(&mut self, bytes: &[u8]) -> Result<IoStatus, TransportError>;

    /// Pushes several segments in one attempt where the platform supports it.
    ///
    /// The default implementation degrades to a plain `send` of the first
    /// non-empty segment.
    fn send_vectored(&mut self, segments: &[IoSlice<'_>]) -> Result<IoStatus, TransportError> {
        match segments.iter().find(|segment| !segment.is_empty()) {
            Some(segment) => self.send(segment),
            None => Ok(IoStatus::Ready(0)),
        }
    }

    /// Transfers bytes directly from a file region, without an intermediate
    /// user-space copy, where the platform supports it.
    fn send_file_region(&mut self, _file: &File, _offset: u64, _len: u64) -> Result<FileSendStatus, TransportError> {
        Ok(FileSendStatus::Unsupported)
    }

    /// Applies the platform cork option (delay transmission for coalescing).
    ///
    /// Callers are expected to cache the applied value; see
    /// [`crate::send::SendOptimizer`].
    fn set_cork(&mut self, _enabled: bool) -> io::Result<()> {
        Ok(())
    }

    /// Applies `TCP_NODELAY`.
    fn set_nodelay(&mut self, _enabled: bool) -> io::Result<()> {
        Ok(())
    }

    /// Whether payload bytes pass through an encryption layer. Encrypting
    /// transports never take the accelerated file path.
    fn is_encrypted(&self) -> bool {
        false
    }

    /// Releases the encryption session (if any), then the socket.
    ///
    /// Idempotent; later calls are no-ops.
    fn shutdown(&mut self);
}
