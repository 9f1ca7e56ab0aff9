//! Plain (unencrypted) TCP transport.

use std::cmp;
use std::fs::File;
use std::io;
use std::io::{IoSlice, Read, Write};
use std::net::{Shutdown, TcpStream};

use bytes::BytesMut;
use tracing::{debug, trace};

use super::{FileSendStatus, IoStatus, Transport, TransportError};

/// Stack scratch space for one receive attempt.
const RECV_CHUNK: usize = 16 * 1024;

/// A non-blocking `TcpStream` behind the [`Transport`] contract.
///
/// The stream is switched to non-blocking mode on construction. Fatal errors
/// are remembered, so every operation after the first failure reports the
/// same [`TransportError`].
#[derive(Debug)]
pub struct PlainTransport {
    stream: TcpStream,
    dead: Option<TransportError>,
    shut: bool,
}

impl PlainTransport {
    /// Wraps an already-accepted stream, putting it into non-blocking mode.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self { stream, dead: None, shut: false })
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

    fn fatal(&mut self, e: &io::Error) -> TransportError {
        let error = TransportError::from_io(e);
        debug!(cause = %error, "transport entered failed state");
        self.dead = Some(error.clone());
        error
    }

    fn send_result(&mut self, result: io::Result<usize>) -> Result<IoStatus, TransportError> {
        match result {
            Ok(n) => {
                trace!(sent = n, "socket send");
                Ok(IoStatus::Ready(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoStatus::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(IoStatus::Ready(0)),
            Err(e) => Err(self.fatal(&e)),
        }
    }
}

impl Transport for PlainTransport {
    fn receive(&mut self, buf: &mut BytesMut, max: usize) -> Result<IoStatus, TransportError> {
        self.check_dead()?;

        let mut scratch = [0u8; RECV_CHUNK];
        let want = cmp::min(max, RECV_CHUNK);
        if want == 0 {
            return Ok(IoStatus::Ready(0));
        }

        loop {
            match self.stream.read(&mut scratch[..want]) {
                Ok(0) => return Ok(IoStatus::Closed),
                Ok(n) => {
                    trace!(received = n, "socket receive");
                    buf.extend_from_slice(&scratch[..n]);
                    return Ok(IoStatus::Ready(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fatal(&e)),
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<IoStatus, TransportError> {
        self.check_dead()?;
        let result = self.stream.write(bytes);
        self.send_result(result)
    }

    fn send_vectored(&mut self, segments: &[IoSlice<'_>]) -> Result<IoStatus, TransportError> {
        self.check_dead()?;
        let result = self.stream.write_vectored(segments);
        self.send_result(result)
    }

    #[cfg(target_os = "linux")]
    fn send_file_region(&mut self, file: &File, offset: u64, len: u64) -> Result<FileSendStatus, TransportError> {
        use std::os::fd::AsRawFd;

        self.check_dead()?;
        if len == 0 {
            return Ok(FileSendStatus::Sent(0));
        }

        let mut off = offset as libc::off_t;
        let count = cmp::min(len, usize::MAX as u64) as usize;
        // SAFETY: both descriptors are open for the lifetime of this call and
        // `off` points to a live stack variable.
        let rc = unsafe { libc::sendfile(self.stream.as_raw_fd(), file.as_raw_fd(), &mut off, count) };
        if rc >= 0 {
            trace!(sent = rc, "sendfile transfer");
            return Ok(FileSendStatus::Sent(rc as usize));
        }

        let e = io::Error::last_os_error();
        match e.kind() {
            io::ErrorKind::WouldBlock => Ok(FileSendStatus::WouldBlock),
            io::ErrorKind::Interrupted => Ok(FileSendStatus::Sent(0)),
            // EINVAL/ENOSYS: descriptor or kernel cannot do zero-copy here
            io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported => Ok(FileSendStatus::Unsupported),
            _ => Err(self.fatal(&e)),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn send_file_region(&mut self, _file: &File, _offset: u64, _len: u64) -> Result<FileSendStatus, TransportError> {
        self.check_dead()?;
        Ok(FileSendStatus::Unsupported)
    }

    fn set_cork(&mut self, enabled: bool) -> io::Result<()> {
        set_cork_option(&self.stream, enabled)
    }

    fn set_nodelay(&mut self, enabled: bool) -> io::Result<()> {
        self.stream.set_nodelay(enabled)
    }

    fn shutdown(&mut self) {
        if self.shut {
            return;
        }
        self.shut = true;
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!(cause = %e, "socket shutdown failed");
        }
    }
}

/// Applies the platform's transmit-delay option: `TCP_CORK` on Linux,
/// `TCP_NOPUSH` on the BSDs and macOS, a no-op elsewhere.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
pub(crate) fn set_cork_option(stream: &TcpStream, enabled: bool) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    #[cfg(target_os = "linux")]
    const OPTION: libc::c_int = libc::TCP_CORK;
    #[cfg(not(target_os = "linux"))]
    const OPTION: libc::c_int = libc::TCP_NOPUSH;

    let flag: libc::c_int = libc::c_int::from(enabled);
    // SAFETY: fd is a valid open socket and the option value outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::IPPROTO_TCP,
            OPTION,
            std::ptr::from_ref(&flag).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "freebsd")))]
pub(crate) fn set_cork_option(_stream: &TcpStream, _enabled: bool) -> io::Result<()> {
    Ok(())
}
