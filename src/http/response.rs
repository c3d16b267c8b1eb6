//! The outbound response head and the rules for framing its body
//! (spec §4.2 steps 4-5, §3 Response data model).
//!
//! The gateway application supplies a status and a header list via
//! `start_response` (see [`crate::gateway`]); this module turns that into
//! a validated [`Response`] and decides how the body that follows will be
//! framed on the wire — by `Content-Length`, by chunked transfer-coding,
//! or by closing the connection after the body, per RFC 7230 §3.3.3.

use crate::http::types::{HeaderMap, Status, Version};

/// Headers the connection handler owns and strips from whatever the
/// application supplies, since it recomputes them itself (RFC 7230 §6.1
/// hop-by-hop headers, plus the framing headers proper).
const STRIPPED_RESPONSE_HEADERS: &[&[u8]] = &[
    b"connection",
    b"keep-alive",
    b"proxy-authenticate",
    b"proxy-authorization",
    b"te",
    b"trailer",
    b"transfer-encoding",
    b"upgrade",
    b"content-length",
];

/// The status and header list an application handed to `start_response`,
/// with hop-by-hop and framing headers already stripped out.
#[derive(Debug, Clone)]
pub struct Response {
    status: Status,
    headers: HeaderMap,
    declared_length: Option<usize>,
}

impl Response {
    /// Builds a response head from what the application supplied,
    /// stripping headers the connection handler will recompute itself.
    /// Retains any `Content-Length` the application set (after validating
    /// it), since a correct one lets the handler frame with identity
    /// encoding instead of chunking.
    pub(crate) fn new(status: Status, application_headers: HeaderMap) -> Self {
        let mut headers = HeaderMap::with_capacity(application_headers.len());
        let mut declared_length = None;
        for header in application_headers.iter() {
            if header.name_eq_ignore_case(b"content-length") {
                declared_length = std::str::from_utf8(header.value())
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok());
                continue;
            }
            if STRIPPED_RESPONSE_HEADERS
                .iter()
                .any(|stripped| header.name_eq_ignore_case(stripped))
            {
                continue;
            }
            headers.push(header.clone());
        }
        Response {
            status,
            headers,
            declared_length,
        }
    }

    #[inline]
    pub(crate) fn status(&self) -> &Status {
        &self.status
    }

    #[inline]
    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Decides how the body following this head is framed, per RFC 7230
    /// §3.3.3: an application-declared `Content-Length` wins if present;
    /// otherwise HTTP/1.1 falls back to chunked, HTTP/1.0 to close.
    ///
    /// `HEAD` gets exactly the same framing headers a `GET` would have
    /// gotten (spec §8's testable property: "HEAD responses produce
    /// identical headers to GET but zero body bytes") — the connection
    /// handler is the one that knows to withhold the actual body bytes for
    /// `HEAD`, not this decision. A status that never carries a body
    /// (1xx/204/304) is the one real exception: it reports a zero length
    /// regardless of what the application declared.
    pub(crate) fn framing_for(&self, version: Version) -> OutboundFraming {
        if is_bodyless_status(self.status.code()) {
            return OutboundFraming::ContentLength(0);
        }
        match (self.declared_length, version) {
            (Some(len), _) => OutboundFraming::ContentLength(len),
            (None, Version::Http11) => OutboundFraming::Chunked,
            (None, Version::Http10) => OutboundFraming::Close,
        }
    }
}

/// 1xx, 204, and 304 responses never carry a body (RFC 7230 §3.3.2/3.3.3).
fn is_bodyless_status(code: u16) -> bool {
    (100..200).contains(&code) || code == 204 || code == 304
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutboundFraming {
    ContentLength(usize),
    Chunked,
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::{Header, StatusCode};

    fn headers(pairs: &[(&[u8], &[u8])]) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(pairs.len());
        for (n, v) in pairs {
            map.push(Header::new(*n, *v));
        }
        map
    }

    #[test]
    fn strips_hop_by_hop_and_content_length_from_application_headers() {
        let app_headers = headers(&[
            (b"Content-Type", b"text/plain"),
            (b"Connection", b"keep-alive"),
            (b"Content-Length", b"5"),
            (b"Transfer-Encoding", b"chunked"),
        ]);
        let resp = Response::new(StatusCode::Ok.into(), app_headers);
        assert_eq!(resp.headers().len(), 1);
        assert_eq!(resp.headers().get(b"content-type"), Some(&b"text/plain"[..]));
        assert_eq!(resp.headers().get(b"connection"), None);
        assert_eq!(resp.headers().get(b"transfer-encoding"), None);
    }

    #[test]
    fn declared_content_length_wins_over_chunking() {
        let resp = Response::new(StatusCode::Ok.into(), headers(&[(b"Content-Length", b"5")]));
        assert_eq!(resp.framing_for(Version::Http11), OutboundFraming::ContentLength(5));
    }

    #[test]
    fn http11_without_content_length_chunks() {
        let resp = Response::new(StatusCode::Ok.into(), headers(&[]));
        assert_eq!(resp.framing_for(Version::Http11), OutboundFraming::Chunked);
    }

    #[test]
    fn http10_without_content_length_closes() {
        let resp = Response::new(StatusCode::Ok.into(), headers(&[]));
        assert_eq!(resp.framing_for(Version::Http10), OutboundFraming::Close);
    }

    /// HEAD gets identical framing to GET; the connection handler withholds
    /// the actual body bytes, this module never special-cases the method.
    #[test]
    fn head_request_gets_same_framing_as_get() {
        let resp = Response::new(StatusCode::Ok.into(), headers(&[]));
        assert_eq!(resp.framing_for(Version::Http11), OutboundFraming::Chunked);
    }

    #[test]
    fn no_content_status_never_carries_a_body() {
        let resp = Response::new(StatusCode::NoContent.into(), headers(&[(b"Content-Length", b"9")]));
        assert_eq!(resp.framing_for(Version::Http11), OutboundFraming::ContentLength(0));
    }
}
