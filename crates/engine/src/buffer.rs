//! Per-connection read and write buffers.
//!
//! Each connection owns exactly one pair of [`bytes::BytesMut`] buffers, both
//! bounded by configured maxima so an adversarial peer cannot grow them
//! without limit. The read buffer is append-only until the codec consumes a
//! prefix with `split_to`, which also reclaims the space; the write buffer is
//! filled by the response encoder and drained strictly in order by the send
//! optimizer.
//!
//! Reaching a buffer's capacity before a logical unit (a header block, one
//! chunk) completes is a fatal condition for the connection; the state
//! machine checks [`ConnectionBuffers::read_is_full`] when the decoder asks
//! for more data, and the encoder checks the remaining write room before
//! producing output.

use bytes::BytesMut;

use crate::transport::{IoStatus, Transport, TransportError};

/// The bounded read/write buffer pair of one connection.
#[derive(Debug)]
pub struct ConnectionBuffers {
    read: BytesMut,
    write: BytesMut,
    read_limit: usize,
    write_limit: usize,
}

impl ConnectionBuffers {
    pub fn new(read_limit: usize, write_limit: usize) -> Self {
        Self { read: BytesMut::new(), write: BytesMut::new(), read_limit, write_limit }
    }

    /// The read buffer, consumed by the request decoder.
    pub fn read_buf(&mut self) -> &mut BytesMut {
        &mut self.read
    }

    /// The write buffer, filled by the response encoder and drained by the
    /// send optimizer.
    pub fn write_buf(&mut self) -> &mut BytesMut {
        &mut self.write
    }

    /// Pulls bytes from the transport into the read buffer, bounded by the
    /// remaining capacity.
    ///
    /// Callers must check [`read_is_full`](Self::read_is_full) first; with no
    /// room left this reports `Ready(0)` without touching the transport.
    pub fn fill_read<T: Transport>(&mut self, transport: &mut T) -> Result<IoStatus, TransportError> {
        let room = self.read_limit.saturating_sub(self.read.len());
        if room == 0 {
            return Ok(IoStatus::Ready(0));
        }
        transport.receive(&mut self.read, room)
    }

    /// Whether the read buffer has hit its capacity limit.
    pub fn read_is_full(&self) -> bool {
        self.read.len() >= self.read_limit
    }

    /// Bytes of unconsumed input currently buffered.
    pub fn read_pending(&self) -> usize {
        self.read.len()
    }

    /// Remaining write-side capacity.
    pub fn write_room(&self) -> usize {
        self.write_limit.saturating_sub(self.write.len())
    }

    /// Whether undrained response bytes are pending.
    pub fn has_pending_write(&self) -> bool {
        !self.write.is_empty()
    }

    pub fn write_limit(&self) -> usize {
        self.write_limit
    }
}
