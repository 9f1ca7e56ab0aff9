//! TLS transport backed by a sans-io `rustls` server session.
//!
//! The session runs over the same non-blocking `TcpStream` as the plain
//! transport; this wrapper shuttles ciphertext with
//! `read_tls`/`write_tls` and exposes only plaintext through the
//! [`Transport`] contract. While the handshake is still in flight, `receive`
//! feeds the session and reports [`IoStatus::WouldBlock`].

use std::cmp;
use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use bytes::BytesMut;
use rustls::{ServerConfig, ServerConnection};
use tracing::{debug, trace};

use super::{IoStatus, Transport, TransportError};

/// Stack scratch space for one plaintext read.
const RECV_CHUNK: usize = 16 * 1024;

/// Ciphertext the session may buffer before `send` reports would-block.
const SESSION_BUFFER_LIMIT: usize = 64 * 1024;

/// An encrypted [`Transport`] over a non-blocking TCP stream.
pub struct TlsTransport {
    stream: TcpStream,
    session: ServerConnection,
    dead: Option<TransportError>,
    shut: bool,
}

impl TlsTransport {
    /// Wraps an already-accepted stream with a fresh server session.
    ///
    /// The certificate chain and key are supplied through `config` by the
    /// embedding application; the engine performs no certificate loading.
    pub fn new(stream: TcpStream, config: Arc<ServerConfig>) -> Result<Self, TransportError> {
        stream.set_nonblocking(true).map_err(|e| TransportError::from_io(&e))?;
        let mut session = ServerConnection::new(config).map_err(|e| TransportError::Tls { reason: e.to_string() })?;
        session.set_buffer_limit(Some(SESSION_BUFFER_LIMIT));
        Ok(Self { stream, session, dead: None, shut: false })
    }

    /// The wrapped stream, e.g. for registering with a poller.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    fn check_dead(&self) -> Result<(), TransportError> {
        match &self.dead {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn fatal_io(&mut self, e: &io::Error) -> TransportError {
        let error = TransportError::from_io(e);
        debug!(cause = %error, "tls transport entered failed state");
        self.dead = Some(error.clone());
        error
    }

    fn fatal_tls(&mut self, e: &rustls::Error) -> TransportError {
        let error = TransportError::Tls { reason: e.to_string() };
        debug!(cause = %error, "tls session failure");
        self.dead = Some(error.clone());
        // Push out any pending alert before the caller tears us down.
        let _ = self.session.write_tls(&mut self.stream);
        error
    }

    /// Reads ciphertext from the socket into the session.
    ///
    /// `Ready(0)` means nothing was available right now.
    fn pull_ciphertext(&mut self) -> Result<IoStatus, TransportError> {
        loop {
            match self.session.read_tls(&mut self.stream) {
                Ok(0) => return Ok(IoStatus::Closed),
                Ok(n) => {
                    trace!(ciphertext = n, "tls read");
                    if let Err(e) = self.session.process_new_packets() {
                        return Err(self.fatal_tls(&e));
                    }
                    return Ok(IoStatus::Ready(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fatal_io(&e)),
            }
        }
    }

    /// Writes buffered ciphertext (handshake or application data) out.
    fn push_ciphertext(&mut self) -> Result<(), TransportError> {
        while self.session.wants_write() {
            match self.session.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fatal_io(&e)),
            }
        }
        Ok(())
    }
}

impl Transport for TlsTransport {
    fn receive(&mut self, buf: &mut BytesMut, max: usize) -> Result<IoStatus, TransportError> {
        self.check_dead()?;

        let pulled = if self.session.wants_read() { self.pull_ciphertext()? } else { IoStatus::Ready(0) };
        // Handshake responses (and session tickets) must flow even when the
        // caller only asked to read.
        self.push_ciphertext()?;

        let mut scratch = [0u8; RECV_CHUNK];
        let want = cmp::min(max, RECV_CHUNK);
        match self.session.reader().read(&mut scratch[..want]) {
            // Clean close_notify from the peer.
            Ok(0) => Ok(IoStatus::Closed),
            Ok(n) => {
                buf.extend_from_slice(&scratch[..n]);
                Ok(IoStatus::Ready(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // No plaintext yet. If the socket itself hit EOF the session
                // will never produce more.
                if pulled == IoStatus::Closed { Ok(IoStatus::Closed) } else { Ok(IoStatus::WouldBlock) }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("peer closed tcp stream without close_notify");
                Ok(IoStatus::Closed)
            }
            Err(e) => Err(self.fatal_io(&e)),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<IoStatus, TransportError> {
        self.check_dead()?;

        let accepted = match self.session.writer().write(bytes) {
            Ok(n) => n,
            Err(e) => return Err(self.fatal_io(&e)),
        };
        self.push_ciphertext()?;

        if accepted == 0 && !bytes.is_empty() {
            // Session buffer is full of ciphertext the socket would not take.
            return Ok(IoStatus::WouldBlock);
        }
        Ok(IoStatus::Ready(accepted))
    }

    fn set_cork(&mut self, enabled: bool) -> io::Result<()> {
        super::plain::set_cork_option(&self.stream, enabled)
    }

    fn set_nodelay(&mut self, enabled: bool) -> io::Result<()> {
        self.stream.set_nodelay(enabled)
    }

    fn is_encrypted(&self) -> bool {
        true
    }

    fn shutdown(&mut self) {
        if self.shut {
            return;
        }
        self.shut = true;
        if self.dead.is_none() {
            self.session.send_close_notify();
            let _ = self.session.write_tls(&mut self.stream);
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!(cause = %e, "socket shutdown failed");
        }
    }
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("handshaking", &self.session.is_handshaking())
            .field("dead", &self.dead)
            .field("shut", &self.shut)
            .finish_non_exhaustive()
    }
}
