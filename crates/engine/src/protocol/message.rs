use bytes::Bytes;

/// One item produced by the request decoder or consumed by the response
/// encoder: either a header block or a piece of the payload.
#[derive(Debug)]
pub enum Message<T> {
    /// The header portion of a request or response.
    Header(T),
    /// A chunk of payload data, or the end-of-payload marker.
    Payload(PayloadItem),
}

/// A single unit of an HTTP message body.
///
/// Bodies are streamed as a sequence of `Chunk`s followed by exactly one
/// `Eof`. For chunked transfer encoding the `Eof` corresponds to the
/// zero-length terminating chunk; for content-length framing it is produced
/// once the declared number of bytes has been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of payload data.
    Chunk(Bytes),
    /// End of the payload stream.
    Eof,
}

/// Body framing declared by a header block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Exact length in bytes, from `Content-Length`.
    Length(u64),
    /// Chunked transfer encoding.
    Chunked,
    /// No body.
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}

impl<T> Message<T> {
    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }

    #[inline]
    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    /// Returns the contained bytes when this is a `Chunk`.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    /// Consumes the item, returning the contained bytes when this is a `Chunk`.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
