//! Body codecs for the two HTTP/1.1 framings (content-length and chunked)
//! plus the no-body case, unified behind [`PayloadDecoder`] and
//! [`PayloadEncoder`].

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
