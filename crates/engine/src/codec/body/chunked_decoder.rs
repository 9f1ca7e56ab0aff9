//! Decoder for chunked transfer encoding (RFC 9112 §7.1).
//!
//! Works line-at-a-time for the size lines and trailers, and hands chunk
//! data through without copying. Chunk extensions are skipped; trailer
//! fields are consumed and discarded. Both the size line and each trailer
//! line are bounded so a hostile peer cannot grow the read buffer without
//! ever completing a line.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadItem};

/// Upper bound for one chunk-size line or trailer line, CRLF included.
const MAX_LINE_BYTES: usize = 1024;

/// Incremental dechunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting a chunk-size line (`SIZE [;ext]\r\n`).
    SizeLine,
    /// Inside chunk data, `remaining` bytes still owed.
    Data { remaining: u64 },
    /// Expecting the CRLF that terminates a data chunk.
    DataEnd,
    /// After the zero-size chunk: consuming trailer lines until the blank
    /// line.
    Trailers,
    /// Terminator seen; the body is complete.
    Done,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::SizeLine }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::SizeLine => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    trace!(size, "chunk size line");
                    self.state = if size == 0 { State::Trailers } else { State::Data { remaining: size } };
                }

                State::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(src.len() as u64) as usize;
                    let bytes = src.split_to(take).freeze();
                    let left = remaining - bytes.len() as u64;
                    self.state = if left == 0 { State::DataEnd } else { State::Data { remaining: left } };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                State::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let crlf = src.split_to(2);
                    ensure!(&crlf[..] == b"\r\n", ParseError::invalid_body("chunk data not terminated by CRLF"));
                    self.state = State::SizeLine;
                }

                State::Trailers => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        trace!("chunked body complete");
                        self.state = State::Done;
                        return Ok(Some(PayloadItem::Eof));
                    }
                    // Trailer fields are not surfaced; drop them.
                }

                State::Done => return Ok(Some(PayloadItem::Eof)),
            }
        }
    }
}

/// Takes one CRLF-terminated line off the front of `src`, without the
/// terminator. `None` means the line is still incomplete.
fn take_line(src: &mut BytesMut) -> Result<Option<Bytes>, ParseError> {
    match src.iter().position(|b| *b == b'\n') {
        Some(pos) => {
            ensure!(pos < MAX_LINE_BYTES, ParseError::invalid_body("chunk line too long"));
            ensure!(pos > 0 && src[pos - 1] == b'\r', ParseError::invalid_body("chunk line not terminated by CRLF"));
            let line = src.split_to(pos + 1).freeze();
            Ok(Some(line.slice(..pos - 1)))
        }
        None => {
            ensure!(src.len() < MAX_LINE_BYTES, ParseError::invalid_body("chunk line too long"));
            Ok(None)
        }
    }
}

/// Parses the hex chunk size, ignoring any `;extension` suffix.
fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let digits = match line.iter().position(|b| *b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let digits = digits.trim_ascii();
    ensure!(!digits.is_empty(), ParseError::invalid_body("empty chunk size"));

    let mut size: u64 = 0;
    for b in digits {
        let digit = match b {
            b'0'..=b'9' => u64::from(b - b'0'),
            b'a'..=b'f' => u64::from(b - b'a' + 10),
            b'A'..=b'F' => u64::from(b - b'A' + 10),
            _ => return Err(ParseError::invalid_body("invalid chunk size digit")),
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit))
            .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))?;
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut ChunkedDecoder, buf: &mut BytesMut) -> (Vec<u8>, bool) {
        let mut collected = Vec::new();
        loop {
            match decoder.decode(buf).unwrap() {
                Some(PayloadItem::Chunk(bytes)) => collected.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => return (collected, true),
                None => return (collected, false),
            }
        }
    }

    #[test]
    fn two_chunks_then_terminator() {
        let mut buf = BytesMut::from(&b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let (collected, eof) = drain(&mut decoder, &mut buf);
        assert!(eof);
        assert_eq!(collected, b"Wikipedia");
        assert!(buf.is_empty());
    }

    #[test]
    fn byte_at_a_time_gives_same_result() {
        let stream = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::new();
        let mut collected = Vec::new();
        let mut saw_eof = false;

        for byte in stream {
            buf.extend_from_slice(&[*byte]);
            let (piece, eof) = drain(&mut decoder, &mut buf);
            collected.extend_from_slice(&piece);
            saw_eof |= eof;
        }

        assert!(saw_eof);
        assert_eq!(collected, b"Wikipedia");
    }

    #[test]
    fn chunk_extensions_are_skipped() {
        let mut buf = BytesMut::from(&b"5;name=value\r\nhello\r\n0\r\n\r\n"[..]);
        let (collected, eof) = drain(&mut ChunkedDecoder::new(), &mut buf);
        assert!(eof);
        assert_eq!(collected, b"hello");
    }

    #[test]
    fn trailers_are_consumed_and_dropped() {
        let mut buf = BytesMut::from(&b"5\r\nhello\r\n0\r\nExpires: never\r\n\r\nnext"[..]);
        let (collected, eof) = drain(&mut ChunkedDecoder::new(), &mut buf);
        assert!(eof);
        assert_eq!(collected, b"hello");
        // pipelined bytes after the body stay put
        assert_eq!(&buf[..], b"next");
    }

    #[test]
    fn missing_data_crlf_is_fatal() {
        let mut buf = BytesMut::from(&b"5\r\nhelloXX"[..]);
        let mut decoder = ChunkedDecoder::new();
        // chunk data itself decodes fine
        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_chunk());
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn invalid_size_digit_is_fatal() {
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buf).is_err());
    }

    #[test]
    fn size_overflow_is_fatal() {
        let mut buf = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buf).is_err());
    }

    #[test]
    fn unbounded_size_line_is_fatal() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'1'; MAX_LINE_BYTES + 1]);
        assert!(ChunkedDecoder::new().decode(&mut buf).is_err());
    }
}
