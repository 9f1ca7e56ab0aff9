//! Parsed request header and the connection-policy probes derived from it.

use http::header::{CONNECTION, EXPECT};
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// A fully parsed request line plus header fields, without a body.
///
/// Wraps `http::Request<()>` and adds the probes the connection state machine
/// bases its decisions on: whether a body may follow, whether the connection
/// is keep-alive eligible, and whether the client expects an interim
/// `100 Continue` response.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether a request body may accompany this method at all.
    ///
    /// GET, HEAD, DELETE, OPTIONS and CONNECT requests are treated as
    /// body-less regardless of framing headers.
    pub fn may_have_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Keep-alive eligibility from the request side.
    ///
    /// HTTP/1.1 defaults to persistent unless the client sent
    /// `Connection: close`; HTTP/1.0 requires an explicit
    /// `Connection: keep-alive`. Anything older is never persistent.
    pub fn keep_alive(&self) -> bool {
        let connection = self.headers().get(CONNECTION);
        match self.version() {
            Version::HTTP_11 => !matches!(connection, Some(v) if token_eq(v.as_bytes(), b"close")),
            Version::HTTP_10 => matches!(connection, Some(v) if token_eq(v.as_bytes(), b"keep-alive")),
            _ => false,
        }
    }

    /// Whether the client asked for an interim `100 Continue` before sending
    /// the request body.
    pub fn expects_continue(&self) -> bool {
        match self.headers().get(EXPECT) {
            Some(value) => value.as_bytes().eq_ignore_ascii_case(b"100-continue"),
            None => false,
        }
    }
}

fn token_eq(value: &[u8], token: &[u8]) -> bool {
    value.trim_ascii().eq_ignore_ascii_case(token)
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn request(version: Version, connection: Option<&str>) -> RequestHeader {
        let mut builder = Request::builder().method(Method::GET).uri("/").version(version);
        if let Some(value) = connection {
            builder = builder.header(CONNECTION, value);
        }
        RequestHeader::from(builder.body(()).unwrap())
    }

    #[test]
    fn http11_defaults_to_keep_alive() {
        assert!(request(Version::HTTP_11, None).keep_alive());
        assert!(request(Version::HTTP_11, Some("keep-alive")).keep_alive());
        assert!(!request(Version::HTTP_11, Some("close")).keep_alive());
        assert!(!request(Version::HTTP_11, Some("Close")).keep_alive());
    }

    #[test]
    fn http10_requires_explicit_keep_alive() {
        assert!(!request(Version::HTTP_10, None).keep_alive());
        assert!(request(Version::HTTP_10, Some("keep-alive")).keep_alive());
        assert!(request(Version::HTTP_10, Some("Keep-Alive")).keep_alive());
    }

    #[test]
    fn expect_continue_detection() {
        let mut req = request(Version::HTTP_11, None);
        assert!(!req.expects_continue());

        let headers = req.inner.headers_mut();
        headers.insert(EXPECT, HeaderValue::from_static("100-continue"));
        assert!(req.expects_continue());
    }

    #[test]
    fn body_less_methods() {
        let get = request(Version::HTTP_11, None);
        assert!(!get.may_have_body());

        let post = RequestHeader::from(Request::builder().method(Method::POST).uri("/upload").body(()).unwrap());
        assert!(post.may_have_body());
    }
}
