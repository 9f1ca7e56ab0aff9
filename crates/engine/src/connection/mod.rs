//! Non-blocking connection state machine.
//!
//! A [`Connection`] owns one transport, its buffer pair, the request decoder
//! and response encoder, and the send optimizer. All protocol progress
//! happens inside [`Connection::advance`], a non-blocking step function: the
//! dispatcher (an event loop, a pooled poller, or a dedicated thread) calls
//! it whenever the socket reports readiness, and it runs until no further
//! progress is possible without I/O. It then reports the readiness
//! [`Interest`] to wait for, or the final [`TerminationReason`] once the
//! connection is down.
//!
//! Exactly one execution context may own a connection at a time; the
//! machine performs no internal locking. All three deployment modes (single
//! loop, pooled pollers, thread per connection) drive this same function.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::CONNECTION;
use http::{HeaderValue, Method, Response, StatusCode, Version};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::buffer::ConnectionBuffers;
use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::engine::Engine;
use crate::handler::{BodyEvent, Dispatch, Handler, ResponseBody};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use crate::send::{BodySegment, CorkMode, FileRegion, SendOptimizer, SendOutcome, SendPlan};
use crate::transport::{IoStatus, Transport, TransportError};

/// Why a connection terminated, reported once via [`Step::Closed`] and the
/// engine's completion hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Orderly end: final response sent, or the peer closed while idle.
    Completed,
    /// A response was sent, but the exchange failed (handler error or
    /// rejection).
    CompletedWithError,
    /// The idle timeout or the hard lifetime cap expired.
    Timeout,
    /// The peer reset the transport or vanished mid-request.
    ClientReset,
    /// The peer violated HTTP framing.
    ProtocolError,
    /// The engine is shutting down, or the dispatcher dropped the connection.
    Shutdown,
}

/// Readiness the connection wants from the dispatcher before its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Self = Self { read: true, write: false };
    pub const WRITE: Self = Self { read: false, write: true };
}

/// Outcome of one [`Connection::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Still alive; re-dispatch on the given readiness.
    Continue(Interest),
    /// The connection is closed. Repeated calls keep returning this.
    Closed(TerminationReason),
}

/// Interim response flushed before reading an expected body.
const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

enum Phase {
    /// Reading and parsing request bytes, feeding the handler.
    Receiving,
    /// Transmitting one send episode (response or interim).
    Sending(Outgoing),
}

/// The in-flight send episode.
struct Outgoing {
    body: OutgoingBody,
    keep_alive: bool,
    /// Close with this reason once the episode completes (error responses).
    reason_on_done: Option<TerminationReason>,
    /// A `100 Continue`: return to receiving afterwards, same request.
    interim: bool,
    /// Whether any bytes of this episode reached the transport yet; the
    /// first pump corks the header so it can share a packet with the body.
    started: bool,
}

enum OutgoingBody {
    /// Everything is already in the write buffer (or suppressed).
    None,
    /// Fixed body fed through the encoder as write-buffer room allows.
    Buffer(Bytes),
    /// File region, candidate for the accelerated transfer path.
    File(FileRegion),
    /// File region copied through the write buffer: the fallback when the
    /// accelerated path is unsupported, and the only path when encrypting.
    FileBuffered(FileRegion),
    /// Chunk-at-a-time producer, framed with chunked transfer encoding.
    Stream { iter: Box<dyn Iterator<Item = Bytes> + Send>, pending: Bytes },
}

impl OutgoingBody {
    fn is_exhausted(&self) -> bool {
        matches!(self, OutgoingBody::None)
    }
}

/// What a sub-step decided: keep stepping, or yield to the dispatcher.
enum Flow {
    Continue,
    Yield(Step),
}

/// One HTTP/1.1 peer session.
pub struct Connection<T, H: Handler> {
    engine: Arc<Engine>,
    transport: T,
    handler: H,
    buffers: ConnectionBuffers,
    decoder: RequestDecoder,
    encoder: ResponseEncoder,
    optimizer: SendOptimizer,
    phase: Phase,

    /// Header of the request currently being served.
    request: Option<RequestHeader>,
    context: Option<H::Context>,
    /// Discard remaining request-body items (handler responded early).
    draining: bool,
    continue_sent: bool,

    started_at: Option<Instant>,
    last_activity: Option<Instant>,
    closed: Option<TerminationReason>,
}

impl<T: Transport, H: Handler> Connection<T, H> {
    pub(crate) fn new(engine: Arc<Engine>, transport: T, handler: H) -> Self {
        let config = engine.config();
        let buffers = ConnectionBuffers::new(config.read_buffer_limit, config.write_buffer_limit);
        let decoder = RequestDecoder::new(config.header_limits());
        let optimizer = SendOptimizer::new(config.cork_threshold);
        Self {
            engine,
            transport,
            handler,
            buffers,
            decoder,
            encoder: ResponseEncoder::new(),
            optimizer,
            phase: Phase::Receiving,
            request: None,
            context: None,
            draining: false,
            continue_sent: false,
            started_at: None,
            last_activity: None,
            closed: None,
        }
    }

    /// The underlying transport, e.g. for registering its socket with a
    /// poller.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs the state machine until it cannot progress without I/O.
    ///
    /// Never blocks. `now` is the dispatcher's monotonic clock reading, used
    /// for idle and lifetime enforcement.
    pub fn advance(&mut self, now: Instant) -> Step {
        if let Some(reason) = self.closed {
            return Step::Closed(reason);
        }

        let started_at = *self.started_at.get_or_insert(now);
        let last_activity = *self.last_activity.get_or_insert(now);

        if self.engine.is_shutting_down() {
            return self.close(TerminationReason::Shutdown);
        }
        if now.duration_since(last_activity) >= self.engine.config().idle_timeout {
            debug!("idle timeout expired");
            return self.close(TerminationReason::Timeout);
        }
        if let Some(cap) = self.engine.config().lifetime_limit {
            if now.duration_since(started_at) >= cap {
                debug!("connection lifetime cap expired");
                return self.close(TerminationReason::Timeout);
            }
        }

        loop {
            let flow = match self.phase {
                Phase::Receiving => self.step_receive(now),
                Phase::Sending(_) => self.step_send(now),
            };
            match flow {
                Flow::Continue => {}
                Flow::Yield(step) => return step,
            }
        }
    }

    // ---- receive side ----------------------------------------------------

    fn step_receive(&mut self, now: Instant) -> Flow {
        loop {
            match self.decoder.decode(self.buffers.read_buf()) {
                Ok(Some(Message::Header((header, _)))) => {
                    trace!(method = %header.method(), uri = %header.uri(), "request received");
                    self.request = Some(header);
                    self.context = Some(H::Context::default());
                    self.continue_sent = false;
                    return self.dispatch(BodyEvent::Headers, false);
                }
                Ok(Some(Message::Payload(PayloadItem::Chunk(bytes)))) => {
                    if self.draining {
                        continue;
                    }
                    let chunk = bytes;
                    return self.dispatch(BodyEvent::Chunk(&chunk), false);
                }
                Ok(Some(Message::Payload(PayloadItem::Eof))) => {
                    if self.draining {
                        // request fully consumed; ready for the next one
                        self.finish_request();
                        continue;
                    }
                    return self.dispatch(BodyEvent::End, true);
                }
                Ok(None) => return self.fill_from_transport(now),
                Err(e) => {
                    warn!(cause = %e, "request parsing failed");
                    return self.synthesize_error(error_status(&e), TerminationReason::ProtocolError);
                }
            }
        }
    }

    /// Pulls more bytes from the transport when the decoder needs them.
    fn fill_from_transport(&mut self, now: Instant) -> Flow {
        if self.buffers.read_is_full() {
            // a full buffer without one decodable unit is a peer problem
            warn!(buffered = self.buffers.read_pending(), "read buffer exhausted mid-unit");
            return self.synthesize_error(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, TerminationReason::ProtocolError);
        }

        match self.buffers.fill_read(&mut self.transport) {
            Ok(IoStatus::Ready(n)) if n > 0 => {
                self.last_activity = Some(now);
                Flow::Continue
            }
            Ok(IoStatus::Ready(_)) | Ok(IoStatus::WouldBlock) => Flow::Yield(Step::Continue(Interest::READ)),
            Ok(IoStatus::Closed) => {
                let mid_request = self.request.is_some() || self.decoder.mid_request() || self.buffers.read_pending() > 0;
                if mid_request {
                    debug!("peer closed mid-request");
                    Flow::Yield(self.close(TerminationReason::ClientReset))
                } else {
                    Flow::Yield(self.close(TerminationReason::Completed))
                }
            }
            Err(e) => Flow::Yield(self.fatal_transport(&e)),
        }
    }

    /// Hands one body event to the handler and acts on its dispatch.
    fn dispatch(&mut self, event: BodyEvent<'_>, at_end: bool) -> Flow {
        let Some(request) = &self.request else {
            return Flow::Yield(self.close(TerminationReason::ProtocolError));
        };
        let Some(context) = &mut self.context else {
            return Flow::Yield(self.close(TerminationReason::ProtocolError));
        };

        match self.handler.call(request, event, context) {
            Ok(Dispatch::Respond(response)) => self.start_response(response, None),
            Ok(Dispatch::NeedBody) if at_end => {
                warn!("handler asked for body data past end of body");
                self.synthesize_error(StatusCode::INTERNAL_SERVER_ERROR, TerminationReason::CompletedWithError)
            }
            Ok(Dispatch::NeedBody) => {
                if self.request.as_ref().is_some_and(RequestHeader::expects_continue) && !self.continue_sent {
                    self.continue_sent = true;
                    return self.start_interim();
                }
                Flow::Continue
            }
            Ok(Dispatch::Reject) => {
                debug!("handler rejected the request");
                self.synthesize_error(StatusCode::BAD_REQUEST, TerminationReason::CompletedWithError)
            }
            Err(e) => {
                warn!(cause = %e, "handler failed");
                self.synthesize_error(StatusCode::INTERNAL_SERVER_ERROR, TerminationReason::CompletedWithError)
            }
        }
    }

    /// Clears per-request state after its last body item, keeping buffered
    /// pipelined bytes intact.
    fn finish_request(&mut self) {
        self.request = None;
        self.context = None;
        self.draining = false;
        self.continue_sent = false;
    }

    // ---- send side -------------------------------------------------------

    /// Queues the interim `100 Continue`, flushed uncorked before body reads.
    fn start_interim(&mut self) -> Flow {
        trace!("sending interim 100 continue");
        self.buffers.write_buf().extend_from_slice(CONTINUE_RESPONSE);
        self.phase = Phase::Sending(Outgoing {
            body: OutgoingBody::None,
            keep_alive: true,
            reason_on_done: None,
            interim: true,
            started: false,
        });
        Flow::Continue
    }

    /// Encodes the response head and stages its body for transmission.
    fn start_response(&mut self, response: Response<ResponseBody>, forced_reason: Option<TerminationReason>) -> Flow {
        let (mut parts, body) = response.into_parts();

        let head_only = self.request.as_ref().is_some_and(|r| r.method() == Method::HEAD);
        let request_keep_alive = self.request.as_ref().is_some_and(RequestHeader::keep_alive);
        // `Connection` is a comma-separated token list.
        let response_close = parts.headers.get(CONNECTION).is_some_and(|v| {
            v.as_bytes().split(|b| *b == b',').any(|token| token.trim_ascii().eq_ignore_ascii_case(b"close"))
        });
        let keep_alive = forced_reason.is_none() && request_keep_alive && !response_close;

        if let Some(request) = &self.request {
            parts.version = request.version();
        }
        if parts.version == Version::HTTP_10 && keep_alive {
            parts.headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }
        if !keep_alive && forced_reason.is_none() && !response_close {
            parts.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let (payload_size, mut outgoing_body) = match body {
            ResponseBody::Empty => (PayloadSize::Empty, OutgoingBody::None),
            ResponseBody::Full(bytes) => (PayloadSize::Length(bytes.len() as u64), OutgoingBody::Buffer(bytes)),
            ResponseBody::File(region) => (PayloadSize::Length(region.remaining()), OutgoingBody::File(region)),
            ResponseBody::Stream(iter) => (PayloadSize::Chunked, OutgoingBody::Stream { iter, pending: Bytes::new() }),
        };
        if head_only {
            // header declares the real framing, but no body bytes go out
            outgoing_body = OutgoingBody::None;
        }

        let head = Response::from_parts(parts, ());
        if let Err(e) = self.encoder.encode(Message::Header((head, payload_size)), self.buffers.write_buf()) {
            warn!(cause = %e, "response head encoding failed");
            return Flow::Yield(self.close(TerminationReason::CompletedWithError));
        }
        // File bodies bypass the encoder: their length is already declared.
        if head_only || matches!(outgoing_body, OutgoingBody::File(_) | OutgoingBody::FileBuffered(_)) {
            self.encoder.suppress_body();
        }

        // A body the handler never consumed is drained before keep-alive.
        self.draining = self.decoder.mid_request();

        self.phase = Phase::Sending(Outgoing {
            body: outgoing_body,
            keep_alive,
            reason_on_done: forced_reason,
            interim: false,
            started: false,
        });
        Flow::Continue
    }

    /// Synthesizes an engine-generated error response and schedules close.
    fn synthesize_error(&mut self, status: StatusCode, reason: TerminationReason) -> Flow {
        if self.encoder.mid_response() {
            // a response is half on the wire; nothing coherent can follow it
            return Flow::Yield(self.close(reason));
        }
        let response = match Response::builder()
            .status(status)
            .header(CONNECTION, HeaderValue::from_static("close"))
            .body(ResponseBody::Empty)
        {
            Ok(response) => response,
            Err(_) => return Flow::Yield(self.close(reason)),
        };
        self.start_response(response, Some(reason))
    }

    fn step_send(&mut self, now: Instant) -> Flow {
        if let Err(flow) = self.produce_body_bytes() {
            return flow;
        }

        let Phase::Sending(outgoing) = &mut self.phase else {
            return Flow::Continue;
        };

        let more_after_this = !outgoing.body.is_exhausted() && !matches!(outgoing.body, OutgoingBody::File(_));
        let mode = if outgoing.interim || (!more_after_this && matches!(outgoing.body, OutgoingBody::None)) {
            CorkMode::NoCork
        } else if outgoing.started {
            CorkMode::MayCork
        } else {
            CorkMode::HeaderCork
        };
        outgoing.started = true;

        let body_segment = match &mut outgoing.body {
            OutgoingBody::File(region) => BodySegment::File(region),
            _ => BodySegment::None,
        };
        let plan = SendPlan { head: self.buffers.write_buf(), body: body_segment, mode };

        let progress = match self.optimizer.pump(&mut self.transport, plan) {
            Ok(progress) => progress,
            Err(e) => return Flow::Yield(self.fatal_transport(&e)),
        };
        if progress.sent > 0 {
            self.last_activity = Some(now);
        }

        match progress.outcome {
            SendOutcome::Blocked => Flow::Yield(Step::Continue(Interest::WRITE)),
            SendOutcome::FileUnsupported => {
                let Phase::Sending(outgoing) = &mut self.phase else { return Flow::Continue };
                if let OutgoingBody::File(region) = std::mem::replace(&mut outgoing.body, OutgoingBody::None) {
                    trace!(remaining = region.remaining(), "file send falling back to buffered copy");
                    outgoing.body = OutgoingBody::FileBuffered(region);
                }
                Flow::Continue
            }
            SendOutcome::Done => {
                let Phase::Sending(outgoing) = &mut self.phase else { return Flow::Continue };
                if matches!(&outgoing.body, OutgoingBody::File(region) if region.is_finished()) {
                    outgoing.body = OutgoingBody::None;
                }
                if !outgoing.body.is_exhausted() || self.buffers.has_pending_write() {
                    // more body to produce; keep stepping
                    return Flow::Continue;
                }
                // The accelerated file path can complete inside a corked
                // pump; every finished episode must leave the socket
                // uncorked.
                self.optimizer.flush(&mut self.transport);
                self.finish_episode()
            }
        }
    }

    /// Moves body bytes into the write buffer, bounded by its capacity.
    fn produce_body_bytes(&mut self) -> Result<(), Flow> {
        let Phase::Sending(outgoing) = &mut self.phase else {
            return Ok(());
        };

        let mut room = self.buffers.write_room();
        loop {
            match &mut outgoing.body {
                OutgoingBody::None | OutgoingBody::File(_) => return Ok(()),
                OutgoingBody::Buffer(bytes) => {
                    if bytes.is_empty() {
                        // the length encoder retires itself once the declared
                        // byte count is reached
                        if self.encoder.mid_response() {
                            let result =
                                self.encoder.encode(Message::Payload(PayloadItem::Eof), self.buffers.write_buf());
                            if result.is_err() {
                                return Err(Flow::Yield(self.close(TerminationReason::CompletedWithError)));
                            }
                        }
                        outgoing.body = OutgoingBody::None;
                        return Ok(());
                    }
                    if room == 0 {
                        return Ok(());
                    }
                    let chunk = bytes.split_to(room.min(bytes.len()));
                    room -= chunk.len();
                    let result = self.encoder.encode(Message::Payload(PayloadItem::Chunk(chunk)), self.buffers.write_buf());
                    if result.is_err() {
                        return Err(Flow::Yield(self.close(TerminationReason::CompletedWithError)));
                    }
                }
                OutgoingBody::FileBuffered(region) => {
                    if region.is_finished() {
                        outgoing.body = OutgoingBody::None;
                        return Ok(());
                    }
                    if room == 0 {
                        return Ok(());
                    }
                    match region.read_into(self.buffers.write_buf(), room) {
                        Ok(0) => {
                            warn!(owed = region.remaining(), "file shorter than the declared response length");
                            return Err(Flow::Yield(self.close(TerminationReason::CompletedWithError)));
                        }
                        Ok(n) => room -= n,
                        Err(e) => {
                            warn!(cause = %e, "file read failed");
                            return Err(Flow::Yield(self.close(TerminationReason::CompletedWithError)));
                        }
                    }
                }
                OutgoingBody::Stream { iter, pending } => {
                    if pending.is_empty() {
                        match iter.next() {
                            Some(bytes) => *pending = bytes,
                            None => {
                                let result =
                                    self.encoder.encode(Message::Payload(PayloadItem::Eof), self.buffers.write_buf());
                                if result.is_err() {
                                    return Err(Flow::Yield(self.close(TerminationReason::CompletedWithError)));
                                }
                                outgoing.body = OutgoingBody::None;
                                return Ok(());
                            }
                        }
                    }
                    if pending.is_empty() {
                        continue;
                    }
                    // chunk framing adds a few bytes of overhead per chunk
                    if room < 16 {
                        return Ok(());
                    }
                    let chunk = pending.split_to((room - 16).max(1).min(pending.len()));
                    room = room.saturating_sub(chunk.len() + 16);
                    let result = self.encoder.encode(Message::Payload(PayloadItem::Chunk(chunk)), self.buffers.write_buf());
                    if result.is_err() {
                        return Err(Flow::Yield(self.close(TerminationReason::CompletedWithError)));
                    }
                }
            }
        }
    }

    /// Acts on a fully transmitted send episode.
    fn finish_episode(&mut self) -> Flow {
        let Phase::Sending(outgoing) = &self.phase else {
            return Flow::Continue;
        };
        let keep_alive = outgoing.keep_alive;
        let reason_on_done = outgoing.reason_on_done;
        let interim = outgoing.interim;

        if interim {
            // back to the same request's body
            self.phase = Phase::Receiving;
            return Flow::Continue;
        }
        if let Some(reason) = reason_on_done {
            return Flow::Yield(self.close(reason));
        }
        if !keep_alive {
            return Flow::Yield(self.close(TerminationReason::Completed));
        }

        trace!(pipelined = self.buffers.read_pending(), "keep-alive reset");
        if !self.draining {
            self.finish_request();
        }
        // draining continues in the receive phase; pipelined bytes already
        // buffered are parsed immediately
        self.phase = Phase::Receiving;
        Flow::Continue
    }

    // ---- teardown --------------------------------------------------------

    fn fatal_transport(&mut self, e: &TransportError) -> Step {
        debug!(cause = %e, "transport failed");
        self.close(TerminationReason::ClientReset)
    }

    /// Closes exactly once: uncork, transport shutdown, engine notification.
    fn close(&mut self, reason: TerminationReason) -> Step {
        match self.closed {
            Some(previous) => Step::Closed(previous),
            None => {
                self.closed = Some(reason);
                self.optimizer.flush(&mut self.transport);
                self.transport.shutdown();
                debug!(?reason, "connection closed");
                self.engine.connection_closed(reason);
                Step::Closed(reason)
            }
        }
    }
}

impl<T: std::fmt::Debug, H: Handler> std::fmt::Debug for Connection<T, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("draining", &self.draining)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<T, H: Handler> Drop for Connection<T, H> {
    fn drop(&mut self) {
        if self.closed.is_none() {
            self.engine.connection_closed(TerminationReason::Shutdown);
        }
    }
}

/// Status code synthesized for a parse failure.
fn error_status(e: &ParseError) -> StatusCode {
    match e {
        ParseError::RequestLineTooLong { .. } | ParseError::TooLargeHeader { .. } | ParseError::TooManyHeaders { .. } => {
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
        }
        ParseError::InvalidVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
        _ => StatusCode::BAD_REQUEST,
    }
}
