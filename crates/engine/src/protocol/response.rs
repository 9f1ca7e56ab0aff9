//! Response header type used between the connection layer and the encoder.

use http::Response;

/// The header portion of an HTTP response, before a body source is attached.
pub type ResponseHead = Response<()>;
