//! Application handler contract.
//!
//! The engine calls the handler as the request arrives: once with
//! [`BodyEvent::Headers`] when the header block is parsed, once per decoded
//! body chunk, and once with [`BodyEvent::End`]. The handler answers each
//! call with a [`Dispatch`]: either the response, a request for more body
//! data, or a rejection. The engine never calls the handler again for the
//! same request until the body data it asked for has been delivered.
//!
//! Per-request scratch state lives in [`Handler::Context`], a typed value
//! owned by the connection and handed to every call by mutable reference. It
//! is rebuilt from `Default` for each request, so state never leaks across
//! keep-alive boundaries.

use std::error::Error;
use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use http::Response;

use crate::protocol::RequestHeader;
use crate::send::FileRegion;

/// One step of an arriving request, in order: headers, zero or more chunks,
/// end of body.
#[derive(Debug)]
pub enum BodyEvent<'a> {
    Headers,
    Chunk(&'a Bytes),
    End,
}

/// Where the response body bytes come from.
pub enum ResponseBody {
    Empty,
    /// Complete body, sent with an exact `Content-Length`.
    Full(Bytes),
    /// A file region, eligible for the accelerated transfer path on
    /// unencrypted connections.
    File(FileRegion),
    /// Chunk-at-a-time producer, sent with chunked transfer encoding. The
    /// iterator is polled only while the peer keeps accepting bytes.
    Stream(Box<dyn Iterator<Item = Bytes> + Send>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::File(region) => f.debug_tuple("File").field(region).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// The handler's answer to one [`BodyEvent`].
#[derive(Debug)]
pub enum Dispatch {
    /// Respond now. Any unread remainder of the request body is drained and
    /// discarded by the engine.
    Respond(Response<ResponseBody>),
    /// Deliver more body data before asking again.
    NeedBody,
    /// Refuse the request; the engine synthesizes an error response and
    /// closes the connection.
    Reject,
}

/// Application entry point invoked by the connection state machine.
pub trait Handler {
    /// Per-request scratch state, reset for every request.
    type Context: Default + Send;

    fn call(
        &self,
        request: &RequestHeader,
        event: BodyEvent<'_>,
        context: &mut Self::Context,
    ) -> Result<Dispatch, Box<dyn Error + Send + Sync>>;
}

/// Adapter turning a closure into a [`Handler`] with context type `C`.
pub struct HandlerFn<F, C> {
    f: F,
    _context: PhantomData<fn(&mut C)>,
}

impl<F: fmt::Debug, C> fmt::Debug for HandlerFn<F, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").field("f", &self.f).finish()
    }
}

impl<F, C> Handler for HandlerFn<F, C>
where
    C: Default + Send,
    F: Fn(&RequestHeader, BodyEvent<'_>, &mut C) -> Result<Dispatch, Box<dyn Error + Send + Sync>>,
{
    type Context = C;

    fn call(
        &self,
        request: &RequestHeader,
        event: BodyEvent<'_>,
        context: &mut C,
    ) -> Result<Dispatch, Box<dyn Error + Send + Sync>> {
        (self.f)(request, event, context)
    }
}

pub fn make_handler<F, C>(f: F) -> HandlerFn<F, C>
where
    C: Default + Send,
    F: Fn(&RequestHeader, BodyEvent<'_>, &mut C) -> Result<Dispatch, Box<dyn Error + Send + Sync>>,
{
    HandlerFn { f, _context: PhantomData }
}
