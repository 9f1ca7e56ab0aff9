//! Buffer-level HTTP/1.1 codecs.
//!
//! Everything in this module is sans-io: decoders consume from a `BytesMut`
//! and encoders produce into one, via the `tokio_util::codec` traits. The
//! connection state machine drives them against the buffer manager, so a
//! request parsed from one contiguous buffer and the same bytes arriving in
//! arbitrary partial reads produce identical results.
//!
//! - [`RequestDecoder`]: request line + headers, then the framed body
//!   (content-length or chunked), yielding [`crate::protocol::Message`]s.
//! - [`ResponseEncoder`]: status line + headers, then the framed body.

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use header::HeaderLimits;
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
