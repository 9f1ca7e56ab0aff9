//! Request-line and header-block decoder.
//!
//! Parses raw bytes into a [`RequestHeader`] with `httparse` and determines
//! the body framing from the `Content-Length` and `Transfer-Encoding`
//! headers per RFC 9112 §6.
//!
//! # Limits
//!
//! Three limits bound what a peer can make us buffer: the request-line
//! length, the total header-block size, and the header count. The header
//! count is additionally capped by the fixed parser array
//! ([`MAX_HEADER_NUM`]).
//!
//! # Duplicate headers
//!
//! All header values are kept in arrival order; single-value lookups take
//! the first occurrence (first-wins). The one exception is `Content-Length`:
//! duplicates carrying different values are rejected outright, since framing
//! must be unambiguous.

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Request};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Fixed size of the parser's header array; the configurable header limit is
/// capped by this.
pub const MAX_HEADER_NUM: usize = 64;

/// Configurable bounds applied while parsing a header block.
#[derive(Debug, Clone, Copy)]
pub struct HeaderLimits {
    /// Maximum length of the request line, terminator included.
    pub max_request_line_bytes: usize,
    /// Maximum size of the whole header block, terminator included.
    pub max_header_bytes: usize,
    /// Maximum number of header fields, capped by [`MAX_HEADER_NUM`].
    pub max_headers: usize,
}

impl HeaderLimits {
    /// Hard cap on `max_headers`, from the parser's fixed array.
    pub const HARD_MAX_HEADERS: usize = MAX_HEADER_NUM;
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self { max_request_line_bytes: 2 * 1024, max_header_bytes: 8 * 1024, max_headers: MAX_HEADER_NUM }
    }
}

/// Decoder for a request header block, yielding the parsed header and the
/// body framing that follows it.
#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder {
    limits: HeaderLimits,
}

impl HeaderDecoder {
    pub fn new(limits: HeaderLimits) -> Self {
        Self { limits }
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Shortest parsable request: "GET / HTTP/1.1\r\n\r\n"
        if src.len() < 16 {
            self.check_partial_limits(src)?;
            return Ok(None);
        }
        self.check_partial_limits(src)?;

        let parsed = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
            let mut req = httparse::Request::new(&mut headers);

            let status = req.parse(&src[..]).map_err(|e| match e {
                httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
                e => ParseError::invalid_header(e.to_string()),
            })?;

            match status {
                Status::Complete(header_len) => {
                    trace!(header_len, "parsed request header block");
                    Some((self.build_header(&req)?, header_len))
                }
                Status::Partial => None,
            }
        };

        let Some((header, header_len)) = parsed else {
            return Ok(None);
        };

        ensure!(header_len <= self.limits.max_header_bytes, ParseError::too_large_header(header_len, self.limits.max_header_bytes));

        src.advance(header_len);

        let payload_size = parse_payload(&header)?;
        Ok(Some((header, payload_size)))
    }
}

impl HeaderDecoder {
    /// Bounds that must hold even before a full header block has arrived, so
    /// a peer trickling garbage cannot make us buffer without limit.
    fn check_partial_limits(&self, src: &BytesMut) -> Result<(), ParseError> {
        let line_window = src.len().min(self.limits.max_request_line_bytes);
        let line_complete = src[..line_window].contains(&b'\n');
        ensure!(
            line_complete || src.len() <= self.limits.max_request_line_bytes,
            ParseError::request_line_too_long(self.limits.max_request_line_bytes)
        );
        ensure!(src.len() <= self.limits.max_header_bytes, ParseError::too_large_header(src.len(), self.limits.max_header_bytes));
        Ok(())
    }

    fn build_header(&self, req: &httparse::Request<'_, '_>) -> Result<RequestHeader, ParseError> {
        let header_count = req.headers.len();
        let max_headers = self.limits.max_headers.min(MAX_HEADER_NUM);
        ensure!(header_count <= max_headers, ParseError::too_many_headers(max_headers));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            // HTTP/2 and HTTP/3 use different framing entirely
            v => return Err(ParseError::InvalidVersion(v)),
        };

        let mut builder = Request::builder()
            .method(req.method.ok_or(ParseError::InvalidMethod)?)
            .uri(req.path.ok_or(ParseError::InvalidUri)?)
            .version(version);

        let headers = builder.headers_mut().ok_or(ParseError::InvalidMethod)?;
        headers.reserve(header_count);
        for header in req.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| ParseError::invalid_header(e.to_string()))?;
            let value = HeaderValue::from_bytes(header.value).map_err(|e| ParseError::invalid_header(e.to_string()))?;
            headers.append(name, value);
        }

        let request = builder.body(()).map_err(|e| ParseError::invalid_header(e.to_string()))?;
        Ok(RequestHeader::from(request))
    }
}

/// Determines the body framing from the parsed header block.
///
/// Per RFC 9112 §6.3: `Transfer-Encoding` with a final `chunked` coding wins,
/// otherwise `Content-Length` declares an exact size, otherwise there is no
/// body. Both headers together are rejected, and so is a transfer-encoded
/// request whose final coding is not `chunked`: its body length cannot be
/// determined, so treating it as body-less would let the body bytes be read
/// as the next pipelined request.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    if !header.may_have_body() {
        return Ok(PayloadSize::Empty);
    }

    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let has_cl = header.headers().contains_key(http::header::CONTENT_LENGTH);

    match (te_header, has_cl) {
        (None, false) => Ok(PayloadSize::Empty),

        (Some(te_value), false) => {
            ensure!(is_chunked(te_value), ParseError::invalid_header("transfer-encoding final coding is not chunked"));
            Ok(PayloadSize::Chunked)
        }

        (None, true) => content_length(header).map(PayloadSize::Length),

        (Some(_), true) => {
            Err(ParseError::invalid_content_length("transfer-encoding and content-length both present"))
        }
    }
}

/// Parses `Content-Length`, rejecting conflicting duplicates.
fn content_length(header: &RequestHeader) -> Result<u64, ParseError> {
    let mut parsed: Option<u64> = None;
    for value in header.headers().get_all(http::header::CONTENT_LENGTH) {
        let text = value.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ascii"))?;
        let length = text
            .trim()
            .parse::<u64>()
            .map_err(|_| ParseError::invalid_content_length(format!("value {text} is not a u64")))?;
        match parsed {
            Some(previous) if previous != length => {
                return Err(ParseError::invalid_content_length("conflicting duplicate values"));
            }
            _ => parsed = Some(length),
        }
    }
    // get_all is non-empty here: the caller saw the header
    Ok(parsed.unwrap_or(0))
}

/// `chunked` must be the final coding of the `Transfer-Encoding` list.
fn is_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|b| *b == b',')
        .next()
        .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Version};
    use indoc::indoc;

    fn decoder() -> HeaderDecoder {
        HeaderDecoder::new(HeaderLimits::default())
    }

    fn http_bytes(text: &str) -> BytesMut {
        BytesMut::from(text.replace('\n', "\r\n").as_str())
    }

    #[test]
    fn plain_get() {
        let mut buf = http_bytes(indoc! {"
            GET /index.html?q=1 HTTP/1.1
            Host: 127.0.0.1:8080
            Accept: */*

        "});

        let (header, payload_size) = decoder().decode(&mut buf).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.uri().path(), "/index.html");
        assert_eq!(header.uri().query(), Some("q=1"));
        assert_eq!(header.headers().len(), 2);
        assert_eq!(header.headers().get(http::header::HOST).unwrap(), "127.0.0.1:8080");
        assert!(buf.is_empty());
    }

    #[test]
    fn leaves_body_bytes_in_buffer() {
        let mut buf = http_bytes(indoc! {"
            POST /upload HTTP/1.1
            Host: example.com
            Content-Length: 5

            hello"});

        let (_, payload_size) = decoder().decode(&mut buf).unwrap().unwrap();
        assert_eq!(payload_size, PayloadSize::Length(5));
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn partial_header_returns_none() {
        let mut buf = BytesMut::from("GET /index.html HTTP/1.1\r\nHost: exam");
        assert!(decoder().decode(&mut buf).unwrap().is_none());
        // nothing consumed
        assert_eq!(buf.len(), 36);
    }

    #[test]
    fn chunked_transfer_encoding() {
        let mut buf = http_bytes(indoc! {"
            POST /upload HTTP/1.1
            Host: example.com
            Transfer-Encoding: gzip, chunked

        "});

        let (_, payload_size) = decoder().decode(&mut buf).unwrap().unwrap();
        assert!(payload_size.is_chunked());
    }

    #[test]
    fn transfer_encoding_without_final_chunked_rejected() {
        for coding in ["chunked, gzip", "gzip"] {
            let mut buf = http_bytes(&format!("POST /upload HTTP/1.1\nHost: example.com\nTransfer-Encoding: {coding}\n\n"));
            let err = decoder().decode(&mut buf).unwrap_err();
            assert!(matches!(err, ParseError::InvalidHeader { .. }), "coding {coding:?} was not rejected");
        }
    }

    #[test]
    fn conflicting_content_lengths_rejected() {
        let mut buf = http_bytes(indoc! {"
            POST /upload HTTP/1.1
            Content-Length: 5
            Content-Length: 6

        "});

        let err = decoder().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength { .. }));
    }

    #[test]
    fn agreeing_duplicate_content_lengths_accepted() {
        let mut buf = http_bytes(indoc! {"
            POST /upload HTTP/1.1
            Content-Length: 5
            Content-Length: 5

            hello"});

        let (_, payload_size) = decoder().decode(&mut buf).unwrap().unwrap();
        assert_eq!(payload_size, PayloadSize::Length(5));
    }

    #[test]
    fn content_length_with_transfer_encoding_rejected() {
        let mut buf = http_bytes(indoc! {"
            POST /upload HTTP/1.1
            Content-Length: 5
            Transfer-Encoding: chunked

        "});

        let err = decoder().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength { .. }));
    }

    #[test]
    fn oversized_request_line_rejected_before_completion() {
        let limits = HeaderLimits { max_request_line_bytes: 64, ..HeaderLimits::default() };
        let mut decoder = HeaderDecoder::new(limits);

        let mut buf = BytesMut::from(format!("GET /{} HTTP/1.1", "a".repeat(128)).as_str());
        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::RequestLineTooLong { limit: 64 }));
    }

    #[test]
    fn oversized_header_block_rejected_before_completion() {
        let limits = HeaderLimits { max_header_bytes: 128, ..HeaderLimits::default() };
        let mut decoder = HeaderDecoder::new(limits);

        let mut buf = http_bytes("GET / HTTP/1.1\n");
        let filler = "x".repeat(200);
        buf.extend_from_slice(format!("X-Filler: {filler}\r\n").as_bytes());

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::TooLargeHeader { .. }));
    }

    #[test]
    fn duplicate_headers_keep_arrival_order() {
        let mut buf = http_bytes(indoc! {"
            GET / HTTP/1.1
            X-Tag: first
            X-Tag: second

        "});

        let (header, _) = decoder().decode(&mut buf).unwrap().unwrap();
        // first-wins for single-value lookups, all values preserved
        assert_eq!(header.headers().get("x-tag").unwrap(), "first");
        let all: Vec<_> = header.headers().get_all("x-tag").iter().collect();
        assert_eq!(all, vec!["first", "second"]);
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut buf = http_bytes("GET / HTTP/4.0\n\n");
        assert!(decoder().decode(&mut buf).is_err());
    }
}
