//! The HTTP/1.1 byte-level framing engine (spec §4.1).
//!
//! Delegates request-line/header parsing to `httparse` — a vetted RFC 7230
//! implementation — rather than hand-rolling a parser, per spec §4.1's
//! explicit instruction. `httparse` has no opinion on message bodies, so
//! the chunked transfer-coding codec below is hand-written; that mirrors
//! how the wider Rust HTTP ecosystem splits the work (e.g. hyper layers
//! its own body codec over `httparse`-parsed heads).
//!
//! This is a pull parser: [`FramingEngine::receive`] feeds in bytes,
//! [`FramingEngine::next_event`] pulls out one [`Event`] at a time, never
//! blocking — a `NeedData` result means "call `receive` again before
//! calling me again".

use crate::{
    errors::ErrorKind,
    http::types::{Header, HeaderMap, Method, Version},
};
use bytes::{Bytes, BytesMut};

/// One unit of progress parsed from the incoming byte stream.
#[derive(Debug)]
pub(crate) enum Event {
    /// Not enough bytes buffered yet to make progress; call `receive` again.
    NeedData,
    Request {
        method: Method,
        target: Bytes,
        version: Version,
        headers: HeaderMap,
    },
    Data(Bytes),
    EndOfMessage,
    /// The exchange is complete and `start_next_cycle` hasn't been called
    /// yet — distinguishes "done, ready for more" from "socket closed".
    Paused,
    ConnectionClosed,
}

pub(crate) struct FramingLimits {
    pub(crate) max_headers: usize,
    /// Cap on the size of any single incomplete event (header block, or a
    /// chunk-size line) while it's still being assembled. `None` means
    /// unbounded, matching `--h11-max-incomplete-event-size` unset.
    pub(crate) max_incomplete_event_size: Option<usize>,
}

enum State {
    AwaitingRequestLine,
    AwaitingBody(BodyDecoder),
    /// `EndOfMessage` has been produced; waiting on `start_next_cycle`.
    Paused,
    Closed,
}

enum BodyDecoder {
    None,
    ContentLength(usize),
    Chunked(ChunkedState),
}

enum ChunkedState {
    Size,
    Data(usize),
    DataCrlf,
    TrailerHeaders,
}

pub(crate) struct FramingEngine {
    limits: FramingLimits,
    recv_buf: BytesMut,
    state: State,
}

impl FramingEngine {
    pub(crate) fn new(limits: FramingLimits) -> Self {
        FramingEngine {
            limits,
            recv_buf: BytesMut::with_capacity(4096),
            state: State::AwaitingRequestLine,
        }
    }

    pub(crate) fn receive(&mut self, bytes: &[u8]) {
        self.recv_buf.extend_from_slice(bytes);
    }

    /// Marks the underlying socket as having reached EOF. Any further
    /// `next_event` call reports `ConnectionClosed` once buffered bytes
    /// (if any can still form a complete event) are exhausted.
    pub(crate) fn note_eof(&mut self) {
        if matches!(self.state, State::AwaitingRequestLine) && self.recv_buf.is_empty() {
            self.state = State::Closed;
        }
    }

    pub(crate) fn next_event(&mut self) -> Result<Event, ErrorKind> {
        loop {
            match &mut self.state {
                State::Closed => return Ok(Event::ConnectionClosed),
                State::Paused => return Ok(Event::Paused),
                State::AwaitingRequestLine => match self.try_parse_head()? {
                    Some(event) => return Ok(event),
                    None => return Ok(Event::NeedData),
                },
                State::AwaitingBody(_) => match self.advance_body()? {
                    Some(event) => return Ok(event),
                    None => return Ok(Event::NeedData),
                },
            }
        }
    }

    /// Resets per-exchange parsing state for the next request on a
    /// keep-alive connection. Any bytes already buffered (e.g. a
    /// pipelined second request) are preserved.
    pub(crate) fn start_next_cycle(&mut self) {
        self.state = State::AwaitingRequestLine;
    }

    /// Whether the current exchange's body has neither been fully consumed
    /// nor reached `EndOfMessage` yet. The connection handler uses this to
    /// decide whether undrained body bytes need to be read off the socket
    /// before a keep-alive connection can safely parse its next request
    /// line (spec §4.2 step 1's framing discipline applies just as much to
    /// bytes the application chose never to read).
    pub(crate) fn is_awaiting_body(&self) -> bool {
        matches!(self.state, State::AwaitingBody(_))
    }

    fn over_incomplete_cap(&self) -> bool {
        matches!(self.limits.max_incomplete_event_size, Some(cap) if self.recv_buf.len() > cap)
    }

    fn try_parse_head(&mut self) -> Result<Option<Event>, ErrorKind> {
        let mut header_storage = vec![httparse::EMPTY_HEADER; self.limits.max_headers];
        let mut parsed = httparse::Request::new(&mut header_storage);

        let status = match parsed.parse(&self.recv_buf) {
            Ok(status) => status,
            Err(httparse::Error::TooManyHeaders) => return Err(ErrorKind::TooManyHeaders),
            Err(_) => return Err(ErrorKind::InvalidHeader),
        };

        let consumed = match status {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial => {
                if self.over_incomplete_cap() {
                    return Err(ErrorKind::HeadersTooLarge);
                }
                return Ok(None);
            }
        };

        let method = Method::from_bytes(parsed.method.unwrap_or("").as_bytes())?;
        let target = Bytes::copy_from_slice(parsed.path.unwrap_or("").as_bytes());
        let version = match parsed.version {
            Some(1) => Version::Http11,
            Some(0) => Version::Http10,
            _ => return Err(ErrorKind::InvalidVersion),
        };

        let mut headers = HeaderMap::with_capacity(parsed.headers.len());
        for h in parsed.headers.iter() {
            headers.push(Header::new(
                Bytes::copy_from_slice(h.name.as_bytes()),
                Bytes::copy_from_slice(h.value),
            ));
        }

        let has_content_length = headers.content_length()?;
        let has_chunked = headers.has_chunked_transfer_encoding()?;
        if has_content_length.is_some() && has_chunked {
            return Err(ErrorKind::InvalidContentLength);
        }

        let decoder = if has_chunked {
            BodyDecoder::Chunked(ChunkedState::Size)
        } else if let Some(len) = has_content_length {
            BodyDecoder::ContentLength(len)
        } else {
            BodyDecoder::None
        };

        self.recv_buf.advance_to(consumed);
        self.state = State::AwaitingBody(decoder);
        Ok(Some(Event::Request {
            method,
            target,
            version,
            headers,
        }))
    }

    fn advance_body(&mut self) -> Result<Option<Event>, ErrorKind> {
        let State::AwaitingBody(decoder) = &mut self.state else {
            unreachable!("advance_body called outside AwaitingBody");
        };

        match decoder {
            BodyDecoder::None => {
                self.state = State::Paused;
                Ok(Some(Event::EndOfMessage))
            }
            BodyDecoder::ContentLength(remaining) => {
                if *remaining == 0 {
                    self.state = State::Paused;
                    return Ok(Some(Event::EndOfMessage));
                }
                if self.recv_buf.is_empty() {
                    return Ok(None);
                }
                let take = (*remaining).min(self.recv_buf.len());
                let chunk = self.recv_buf.split_to(take).freeze();
                *remaining -= take;
                Ok(Some(Event::Data(chunk)))
            }
            BodyDecoder::Chunked(chunked) => self.advance_chunked(chunked),
        }
    }

    fn advance_chunked(&mut self, chunked: &mut ChunkedState) -> Result<Option<Event>, ErrorKind> {
        loop {
            match chunked {
                ChunkedState::Size => {
                    let Some(line_end) = find_crlf(&self.recv_buf) else {
                        if self.over_incomplete_cap() {
                            return Err(ErrorKind::IncompleteEventTooLarge);
                        }
                        return Ok(None);
                    };
                    let line = &self.recv_buf[..line_end];
                    let size_str = line.split(|&b| b == b';').next().unwrap_or(line);
                    let size = std::str::from_utf8(size_str)
                        .ok()
                        .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
                        .ok_or(ErrorKind::InvalidHeader)?;
                    self.recv_buf.advance_to(line_end + 2);
                    if size == 0 {
                        *chunked = ChunkedState::TrailerHeaders;
                    } else {
                        *chunked = ChunkedState::Data(size);
                    }
                }
                ChunkedState::Data(remaining) => {
                    if *remaining == 0 {
                        *chunked = ChunkedState::DataCrlf;
                        continue;
                    }
                    if self.recv_buf.is_empty() {
                        return Ok(None);
                    }
                    let take = (*remaining).min(self.recv_buf.len());
                    let chunk = self.recv_buf.split_to(take).freeze();
                    *remaining -= take;
                    return Ok(Some(Event::Data(chunk)));
                }
                ChunkedState::DataCrlf => {
                    if self.recv_buf.len() < 2 {
                        return Ok(None);
                    }
                    if &self.recv_buf[..2] != b"\r\n" {
                        return Err(ErrorKind::InvalidHeader);
                    }
                    self.recv_buf.advance_to(2);
                    *chunked = ChunkedState::Size;
                }
                ChunkedState::TrailerHeaders => {
                    let Some(end) = find_crlf(&self.recv_buf) else {
                        if self.over_incomplete_cap() {
                            return Err(ErrorKind::IncompleteEventTooLarge);
                        }
                        return Ok(None);
                    };
                    // Trailers are parsed only to find the boundary; the
                    // gateway contract has no channel to surface them.
                    let blank = end == 0;
                    self.recv_buf.advance_to(end + 2);
                    if blank {
                        self.state = State::Paused;
                        return Ok(Some(Event::EndOfMessage));
                    }
                }
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memchr(b'\n', buf).and_then(|pos| {
        if pos > 0 && buf[pos - 1] == b'\r' {
            Some(pos - 1)
        } else {
            None
        }
    })
}

trait BytesMutExt {
    fn advance_to(&mut self, n: usize);
}

impl BytesMutExt for BytesMut {
    fn advance_to(&mut self, n: usize) {
        let _ = self.split_to(n);
    }
}

/// Serializes outbound response events (spec §4.1's `send`). The
/// connection handler is the one deciding identity vs. chunked vs.
/// close-delimited framing (spec §4.2 step 5); this just writes bytes
/// for whichever mode it's told.
pub(crate) struct ResponseWriter;

impl ResponseWriter {
    pub(crate) fn write_status_line(
        out: &mut Vec<u8>,
        version: Version,
        status: &crate::http::types::Status,
    ) {
        out.extend_from_slice(version.as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(status.code().to_string().as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(status.reason());
        out.extend_from_slice(b"\r\n");
    }

    pub(crate) fn write_header(out: &mut Vec<u8>, name: &[u8], value: &[u8]) {
        out.extend_from_slice(name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }

    pub(crate) fn write_headers_end(out: &mut Vec<u8>) {
        out.extend_from_slice(b"\r\n");
    }

    pub(crate) fn write_chunk(out: &mut Vec<u8>, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
    }

    pub(crate) fn write_last_chunk(out: &mut Vec<u8>) {
        out.extend_from_slice(b"0\r\n\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FramingEngine {
        FramingEngine::new(FramingLimits {
            max_headers: 32,
            max_incomplete_event_size: Some(16 * 1024),
        })
    }

    #[test]
    fn parses_simple_get_with_no_body() {
        let mut e = engine();
        e.receive(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let ev = e.next_event().unwrap();
        match ev {
            Event::Request { method, version, .. } => {
                assert_eq!(method.as_str(), "GET");
                assert_eq!(version, Version::Http11);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(e.next_event().unwrap(), Event::EndOfMessage));
    }

    #[test]
    fn request_line_split_across_two_reads_needs_data_then_parses() {
        let mut e = engine();
        e.receive(b"GET / HTTP/1.1\r\nHost:");
        assert!(matches!(e.next_event().unwrap(), Event::NeedData));
        e.receive(b" x\r\n\r\n");
        assert!(matches!(e.next_event().unwrap(), Event::Request { .. }));
    }

    #[test]
    fn content_length_body_streams_then_ends() {
        let mut e = engine();
        e.receive(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\nabc");
        assert!(matches!(e.next_event().unwrap(), Event::Request { .. }));
        match e.next_event().unwrap() {
            Event::Data(d) => assert_eq!(&d[..], b"abc"),
            other => panic!("{other:?}"),
        }
        assert!(matches!(e.next_event().unwrap(), Event::EndOfMessage));
    }

    #[test]
    fn chunked_body_decodes_to_end() {
        let mut e = engine();
        e.receive(b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nab\r\n2\r\ncd\r\n0\r\n\r\n");
        assert!(matches!(e.next_event().unwrap(), Event::Request { .. }));
        let mut collected = Vec::new();
        loop {
            match e.next_event().unwrap() {
                Event::Data(d) => collected.extend_from_slice(&d),
                Event::EndOfMessage => break,
                other => panic!("{other:?}"),
            }
        }
        assert_eq!(collected, b"abcd");
    }

    #[test]
    fn rejects_content_length_and_chunked_together() {
        let mut e = engine();
        e.receive(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert!(e.next_event().is_err());
    }

    #[test]
    fn rejects_non_chunked_transfer_encoding() {
        let mut e = engine();
        e.receive(b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: gzip\r\n\r\n");
        assert!(e.next_event().is_err());
    }

    #[test]
    fn pipelined_second_request_survives_start_next_cycle() {
        let mut e = engine();
        e.receive(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(matches!(e.next_event().unwrap(), Event::Request { .. }));
        assert!(matches!(e.next_event().unwrap(), Event::EndOfMessage));
        e.start_next_cycle();
        match e.next_event().unwrap() {
            Event::Request { target, .. } => assert_eq!(&target[..], b"/b"),
            other => panic!("{other:?}"),
        }
    }
}
