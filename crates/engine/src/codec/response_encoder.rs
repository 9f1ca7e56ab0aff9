//! Streaming response encoder.

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError};

/// Encodes a response head followed by its framed body.
///
/// Mirrors [`super::RequestDecoder`]: a `Header` message installs the payload
/// encoder matching its declared framing, `Payload` messages run through it
/// until the body is finished, and the encoder is then ready for the next
/// response on the same connection.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a response head has been encoded but its body is incomplete.
    pub fn mid_response(&self) -> bool {
        self.payload_encoder.is_some()
    }

    /// Drops the pending body encoder.
    ///
    /// Used when the header declares the real framing but no body bytes
    /// follow through the encoder: `HEAD` responses, and file regions sent
    /// outside the write buffer.
    pub fn suppress_body(&mut self) {
        self.payload_encoder.take();
    }
}

impl Encoder<Message<(ResponseHead, PayloadSize)>> for ResponseEncoder {
    type Error = SendError;

    fn encode(
        &mut self,
        item: Message<(ResponseHead, PayloadSize)>,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                self.header_encoder.encode((head, payload_size), dst)?;
                self.payload_encoder = Some(payload_size.into());
                // nothing further for a body-less response
                if self.payload_encoder.as_ref().is_some_and(PayloadEncoder::is_finished) {
                    self.payload_encoder.take();
                }
                Ok(())
            }
            Message::Payload(item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    return Err(SendError::invalid_body("payload without a response head"));
                };
                let is_eof = item.is_eof();
                payload_encoder.encode(item, dst)?;
                if is_eof || payload_encoder.is_finished() {
                    self.payload_encoder.take();
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Response, StatusCode};

    #[test]
    fn fixed_length_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let head = Response::builder().status(StatusCode::OK).body(()).unwrap();

        encoder.encode(Message::Header((head, PayloadSize::Length(5))), &mut dst).unwrap();
        assert!(encoder.mid_response());
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"hello"))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut dst).unwrap();
        assert!(!encoder.mid_response());

        let text = String::from_utf8(dst.to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn chunked_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let head = Response::builder().status(StatusCode::OK).body(()).unwrap();

        encoder.encode(Message::Header((head, PayloadSize::Chunked)), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"abc"))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut dst).unwrap();

        let text = String::from_utf8(dst.to_vec()).unwrap();
        assert!(text.ends_with("\r\n\r\n3\r\nabc\r\n0\r\n\r\n"));
        assert!(!encoder.mid_response());
    }

    #[test]
    fn empty_response_needs_no_payload_messages() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let head = Response::builder().status(StatusCode::NO_CONTENT).body(()).unwrap();

        encoder.encode(Message::Header((head, PayloadSize::Empty)), &mut dst).unwrap();
        assert!(!encoder.mid_response());
    }

    #[test]
    fn payload_before_head_is_rejected() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let result = encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"x"))), &mut dst);
        assert!(result.is_err());
    }

    #[test]
    fn back_to_back_responses() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        for _ in 0..2 {
            let head = Response::builder().status(StatusCode::OK).body(()).unwrap();
            encoder.encode(Message::Header((head, PayloadSize::Length(2))), &mut dst).unwrap();
            encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"ok"))), &mut dst).unwrap();
            encoder.encode(Message::Payload(PayloadItem::Eof), &mut dst).unwrap();
        }

        let text = String::from_utf8(dst.to_vec()).unwrap();
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    }
}
