//! Core HTTP protocol types shared by the codec and connection layers.
//!
//! The types here are deliberately small and transport-agnostic:
//!
//! - [`Message`] / [`PayloadItem`] / [`PayloadSize`]: the unit of exchange
//!   between the codecs and the connection state machine. A request or
//!   response is a header followed by zero or more payload items terminated
//!   by [`PayloadItem::Eof`].
//! - [`RequestHeader`]: a parsed request line plus header fields, wrapping
//!   `http::Request<()>` with the keep-alive and expectation probes the state
//!   machine needs.
//! - [`ResponseHead`]: the response counterpart before a body is attached.
//! - [`HttpError`] / [`ParseError`] / [`SendError`]: the per-layer error
//!   taxonomy. Transport-level failures live in
//!   [`crate::transport::TransportError`].

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
