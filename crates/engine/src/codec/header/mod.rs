//! Header-block codecs: request-line/header parsing and response-head
//! serialization.

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_decoder::HeaderLimits;
pub use header_encoder::HeaderEncoder;
