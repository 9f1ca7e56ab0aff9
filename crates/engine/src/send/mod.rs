//! Send optimizer: cork policy and transfer-path selection.
//!
//! One response is transmitted as a *send episode*: headers, then body,
//! possibly spanning many non-blocking attempts. Each attempt the connection
//! builds a [`SendPlan`] (header segment, body segment, cork mode) and hands
//! it to [`SendOptimizer::pump`], which picks the cheapest path:
//!
//! - header and buffered body together in one vectored send, so they share a
//!   packet without an extra copy;
//! - an accelerated file-region transfer when the transport offers one and
//!   the channel is not encrypting;
//! - otherwise plain buffered sends under the platform cork option.
//!
//! Cork discipline: the optimizer is the only component that touches the
//! cork/no-delay socket options, and it caches the last applied values so
//! redundant system calls are elided. A completed episode always ends
//! uncorked: the final plan of an episode carries [`CorkMode::NoCork`] or
//! the connection calls [`SendOptimizer::flush`] (the accelerated file path
//! can finish inside a corked pump), and fatal transport errors uncork
//! best-effort on the way out.

use std::fs::File;
use std::io;
use std::io::IoSlice;

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::transport::{FileSendStatus, IoStatus, Transport, TransportError};

/// Default cork threshold: one typical TCP segment.
pub const DEFAULT_CORK_THRESHOLD: usize = 1460;

/// How strongly a send attempt wants its bytes coalesced with what follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorkMode {
    /// Push immediately; nothing else is coming in this episode.
    NoCork,
    /// More bytes of the same episode follow shortly; delay transmission.
    MayCork,
    /// Header push: cork only when the header block is smaller than one
    /// network segment, since a larger header gains nothing from coalescing.
    HeaderCork,
}

/// A file region still owed to the peer.
#[derive(Debug)]
pub struct FileRegion {
    file: File,
    offset: u64,
    remaining: u64,
}

impl FileRegion {
    pub fn new(file: File, offset: u64, len: u64) -> Self {
        Self { file, offset, remaining: len }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    fn advance(&mut self, n: usize) {
        self.offset += n as u64;
        self.remaining -= n as u64;
    }

    /// Copies up to `max` bytes of the region into `dst`, advancing the
    /// region. This is the fallback used when no accelerated path exists,
    /// and the only body path on encrypted channels.
    ///
    /// Returns `Ok(0)` at end of file; a region that still has `remaining`
    /// bytes at that point is shorter than the response declared.
    pub fn read_into(&mut self, dst: &mut BytesMut, max: usize) -> io::Result<usize> {
        let want = max.min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        if want == 0 {
            return Ok(0);
        }

        let mut scratch = vec![0u8; want];
        #[cfg(unix)]
        let n = {
            use std::os::unix::fs::FileExt;
            self.file.read_at(&mut scratch, self.offset)?
        };
        #[cfg(not(unix))]
        let n = {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(self.offset))?;
            file.read(&mut scratch)?
        };

        dst.extend_from_slice(&scratch[..n]);
        self.advance(n);
        Ok(n)
    }
}

/// The body half of a [`SendPlan`].
#[derive(Debug)]
pub enum BodySegment<'a> {
    /// No body bytes this attempt.
    None,
    /// Encoded body bytes, drained in order behind the header segment.
    Buffered(&'a mut BytesMut),
    /// A file region to transfer via the accelerated path.
    File(&'a mut FileRegion),
}

impl BodySegment<'_> {
    fn buffered_len(&self) -> usize {
        match self {
            BodySegment::Buffered(buf) => buf.len(),
            _ => 0,
        }
    }
}

/// One send attempt: what to transmit and how eagerly to flush it.
///
/// Plans are built fresh per attempt from connection state and never stored.
#[derive(Debug)]
pub struct SendPlan<'a> {
    /// Header (or generally: already-serialized) bytes, sent first.
    pub head: &'a mut BytesMut,
    pub body: BodySegment<'a>,
    pub mode: CorkMode,
}

/// How far a [`SendOptimizer::pump`] call got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Everything in the plan was accepted by the transport.
    Done,
    /// The transport stopped accepting bytes; retry the remainder on the next
    /// writability notification.
    Blocked,
    /// The file region cannot go through the accelerated path; the caller
    /// must fall back to [`FileRegion::read_into`] and a buffered plan.
    FileUnsupported,
}

/// Result of one pump: bytes moved plus how the attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendProgress {
    pub sent: usize,
    pub outcome: SendOutcome,
}

/// Per-connection cork/no-delay policy and socket-option cache.
#[derive(Debug)]
pub struct SendOptimizer {
    cork_threshold: usize,
    corked: bool,
    nodelay: Option<bool>,
}

impl SendOptimizer {
    pub fn new(cork_threshold: usize) -> Self {
        Self { cork_threshold, corked: false, nodelay: None }
    }

    /// Discharges as much of `plan` as the transport will take right now.
    ///
    /// Partial completion leaves the plan's segments holding exactly the
    /// unsent remainder, so resuming the episode re-offers only what is
    /// still owed.
    pub fn pump<T: Transport>(&mut self, transport: &mut T, plan: SendPlan<'_>) -> Result<SendProgress, TransportError> {
        let SendPlan { head, body, mode } = plan;

        let want_cork = match mode {
            CorkMode::NoCork => false,
            CorkMode::MayCork => true,
            CorkMode::HeaderCork => head.len() < self.cork_threshold,
        };
        self.apply_cork(transport, want_cork);
        if mode == CorkMode::NoCork {
            self.apply_nodelay(transport, true);
        }

        let mut sent = 0;
        let result = drive(transport, head, body, &mut sent);
        match &result {
            Ok(SendOutcome::Done) if mode == CorkMode::NoCork => self.apply_cork(transport, false),
            Err(_) => self.apply_cork(transport, false),
            _ => {}
        }
        result.map(|outcome| SendProgress { sent, outcome })
    }

    /// Flushes any corked bytes; called when an episode ends without a final
    /// `NoCork` pump, e.g. on an error response right before close.
    pub fn flush<T: Transport>(&mut self, transport: &mut T) {
        self.apply_cork(transport, false);
    }

    fn apply_cork<T: Transport>(&mut self, transport: &mut T, enabled: bool) {
        if self.corked == enabled {
            return;
        }
        // Cork is an optimization; a transport that cannot cork still
        // delivers correct bytes.
        if transport.set_cork(enabled).is_ok() {
            self.corked = enabled;
        }
    }

    fn apply_nodelay<T: Transport>(&mut self, transport: &mut T, enabled: bool) {
        if self.nodelay == Some(enabled) {
            return;
        }
        if transport.set_nodelay(enabled).is_ok() {
            self.nodelay = Some(enabled);
        }
    }
}

fn drive<T: Transport>(
    transport: &mut T,
    head: &mut BytesMut,
    mut body: BodySegment<'_>,
    sent: &mut usize,
) -> Result<SendOutcome, TransportError> {
    // Header plus buffered body: one vectored attempt per loop pass so
    // both ride the same packet.
    while !head.is_empty() && body.buffered_len() > 0 {
        let BodySegment::Buffered(ref mut buffered) = body else { unreachable!() };
        let segments = [IoSlice::new(head), IoSlice::new(buffered)];
        match transport.send_vectored(&segments)? {
            IoStatus::Ready(0) => continue,
            IoStatus::Ready(n) => {
                *sent += n;
                let from_head = n.min(head.len());
                head.advance(from_head);
                buffered.advance(n - from_head);
            }
            IoStatus::WouldBlock => return Ok(SendOutcome::Blocked),
            IoStatus::Closed => return Err(TransportError::BrokenPipe),
        }
    }

    drain(transport, head, sent)?;
    if !head.is_empty() {
        return Ok(SendOutcome::Blocked);
    }

    match body {
        BodySegment::None => Ok(SendOutcome::Done),
        BodySegment::Buffered(buffered) => {
            drain(transport, buffered, sent)?;
            if buffered.is_empty() { Ok(SendOutcome::Done) } else { Ok(SendOutcome::Blocked) }
        }
        BodySegment::File(region) => drain_file(transport, region, sent),
    }
}

fn drain<T: Transport>(transport: &mut T, buf: &mut BytesMut, sent: &mut usize) -> Result<(), TransportError> {
    while !buf.is_empty() {
        match transport.send(buf)? {
            IoStatus::Ready(0) => continue,
            IoStatus::Ready(n) => {
                *sent += n;
                buf.advance(n);
            }
            IoStatus::WouldBlock => return Ok(()),
            IoStatus::Closed => return Err(TransportError::BrokenPipe),
        }
    }
    Ok(())
}

fn drain_file<T: Transport>(
    transport: &mut T,
    region: &mut FileRegion,
    sent: &mut usize,
) -> Result<SendOutcome, TransportError> {
    // Encrypted channels must route every body byte through the session.
    if transport.is_encrypted() {
        return Ok(SendOutcome::FileUnsupported);
    }

    while !region.is_finished() {
        match transport.send_file_region(&region.file, region.offset, region.remaining)? {
            FileSendStatus::Sent(0) => continue,
            FileSendStatus::Sent(n) => {
                trace!(transferred = n, remaining = region.remaining, "file region send");
                *sent += n;
                region.advance(n);
            }
            FileSendStatus::WouldBlock => return Ok(SendOutcome::Blocked),
            FileSendStatus::Unsupported => return Ok(SendOutcome::FileUnsupported),
        }
    }
    Ok(SendOutcome::Done)
}
