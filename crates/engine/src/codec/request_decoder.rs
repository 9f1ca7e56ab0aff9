//! Streaming request decoder.
//!
//! Combines the header decoder and the body decoders into one state machine:
//! while `payload_decoder` is `None` the next bytes are a header block; once
//! a header is parsed, its declared framing installs the matching payload
//! decoder, which stays active until it yields `Eof`. The decoder is then
//! immediately ready for the next pipelined request on the same connection.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderDecoder, HeaderLimits};
use crate::protocol::{Message, ParseError, PayloadSize, RequestHeader};

/// Decoder producing a `Header` message followed by `Payload` messages
/// terminated by `Eof`, per request.
#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new(limits: HeaderLimits) -> Self {
        Self { header_decoder: HeaderDecoder::new(limits), payload_decoder: None }
    }

    /// Whether the decoder is mid-request (header seen, body not finished).
    pub fn mid_request(&self) -> bool {
        self.payload_decoder.is_some()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item) => {
                    if item.is_eof() {
                        // body complete; next bytes are a new header block
                        self.payload_decoder.take();
                    }
                    Some(Message::Payload(item))
                }
                None => None,
            };
            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadItem;
    use http::Method;
    use indoc::indoc;

    fn decode_all(decoder: &mut RequestDecoder, buf: &mut BytesMut) -> Vec<Message<(RequestHeader, PayloadSize)>> {
        let mut messages = Vec::new();
        while let Some(message) = decoder.decode(buf).unwrap() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn header_then_body_then_next_request() {
        let text = indoc! {"
            POST /upload HTTP/1.1
            Content-Length: 5

            helloGET / HTTP/1.1

        "}
        .replace('\n', "\r\n");
        let mut buf = BytesMut::from(text.as_str());
        let mut decoder = RequestDecoder::new(HeaderLimits::default());

        let messages = decode_all(&mut decoder, &mut buf);
        assert_eq!(messages.len(), 4);

        let Message::Header((header, payload_size)) = &messages[0] else { panic!("expected header") };
        assert_eq!(header.method(), &Method::POST);
        assert_eq!(*payload_size, PayloadSize::Length(5));

        let Message::Payload(PayloadItem::Chunk(bytes)) = &messages[1] else { panic!("expected chunk") };
        assert_eq!(bytes.as_ref(), b"hello");

        assert!(matches!(&messages[2], Message::Payload(PayloadItem::Eof)));

        let Message::Header((header, payload_size)) = &messages[3] else { panic!("expected header") };
        assert_eq!(header.method(), &Method::GET);
        assert!(payload_size.is_empty());
    }

    #[test]
    fn chunked_body_roundtrip_through_decoder() {
        let text = "POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let mut buf = BytesMut::from(text);
        let mut decoder = RequestDecoder::new(HeaderLimits::default());

        let messages = decode_all(&mut decoder, &mut buf);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].is_header());
        let Message::Payload(PayloadItem::Chunk(bytes)) = &messages[1] else { panic!("expected chunk") };
        assert_eq!(bytes.as_ref(), b"abc");
        assert!(matches!(&messages[2], Message::Payload(PayloadItem::Eof)));
        assert!(!decoder.mid_request());
    }

    #[test]
    fn split_boundaries_do_not_change_the_result() {
        let text = "POST /u HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /next HTTP/1.1\r\n\r\n";

        // one-shot reference parse
        let mut reference = RequestDecoder::new(HeaderLimits::default());
        let mut whole = BytesMut::from(text);
        let expected = decode_all(&mut reference, &mut whole).len();

        // byte-at-a-time parse must yield the same message sequence
        for split in 1..text.len() - 1 {
            let mut decoder = RequestDecoder::new(HeaderLimits::default());
            let mut count = 0;

            let mut buf = BytesMut::from(&text[..split]);
            count += decode_all(&mut decoder, &mut buf).len();
            buf.extend_from_slice(text[split..].as_bytes());
            count += decode_all(&mut decoder, &mut buf).len();

            assert_eq!(count, expected, "diverged at split {split}");
        }
    }
}
