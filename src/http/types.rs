//! Core HTTP/1.1 protocol types: methods, versions, status lines, and headers.

use crate::errors::ErrorKind;
use bytes::Bytes;
use std::fmt;

/// An HTTP request method.
///
/// The gateway contract requires `REQUEST_METHOD` to be an arbitrary
/// uppercase token (RFC 7230 §3.1.1), not a fixed enumeration — custom and
/// extension methods must round-trip unchanged. [`Method`] therefore wraps
/// the raw wire bytes rather than matching the teacher's closed `enum`, but
/// keeps the common-method fast paths as associated constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method(Bytes);

impl Method {
    pub const GET: &'static str = "GET";
    pub const HEAD: &'static str = "HEAD";
    pub const POST: &'static str = "POST";
    pub const PUT: &'static str = "PUT";
    pub const DELETE: &'static str = "DELETE";
    pub const OPTIONS: &'static str = "OPTIONS";
    pub const PATCH: &'static str = "PATCH";

    /// Validates and wraps a request-line method token.
    ///
    /// Rejects empty tokens and any byte outside the RFC 7230 `tchar` set.
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        if src.is_empty() || !src.iter().all(|&b| is_tchar(b)) {
            return Err(ErrorKind::InvalidMethod);
        }
        Ok(Method(Bytes::copy_from_slice(src)))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // Validated as tchar (a subset of ASCII) at construction time.
        std::str::from_utf8(&self.0).unwrap_or("")
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn is_head(&self) -> bool {
        self.0.as_ref() == b"HEAD"
    }

    #[inline]
    pub fn is_safe_bodyless(&self) -> bool {
        matches!(self.0.as_ref(), b"GET" | b"HEAD" | b"DELETE")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[inline(always)]
const fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z'
        | b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*'
        | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
    )
}

/// HTTP protocol version.
///
/// Per the request invariants, only 1.0 and 1.1 are accepted on the wire;
/// anything else is a protocol error (unlike the teacher's crate, which
/// additionally recognizes a bespoke HTTP/0.9-derived variant — dropped
/// here, see DESIGN.md).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"HTTP/1.1" => Ok(Version::Http11),
            b"HTTP/1.0" => Ok(Version::Http10),
            _ => Err(ErrorKind::UnsupportedVersion),
        }
    }

    #[inline]
    pub(crate) const fn as_bytes(self) -> &'static [u8] {
        match self {
            Version::Http11 => b"HTTP/1.1",
            Version::Http10 => b"HTTP/1.0",
        }
    }

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Version::Http11 => "HTTP/1.1",
            Version::Http10 => "HTTP/1.0",
        }
    }

    /// The default keep-alive disposition for this version absent any
    /// `Connection` header (1.1 defaults to persistent, 1.0 does not).
    #[inline]
    pub(crate) const fn default_keep_alive(self) -> bool {
        matches!(self, Version::Http11)
    }
}

/// A three-digit status code plus reason phrase, as supplied by the
/// gateway application to `start_response`.
///
/// Unlike the teacher's closed `StatusCode` enum (kept below as a
/// convenience constructor table, since applications commonly reach for a
/// named constant), the wire representation here must admit arbitrary
/// reason phrases an application supplies, per the gateway contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: u16,
    reason: Bytes,
}

impl Status {
    pub fn new(code: u16, reason: impl Into<Bytes>) -> Result<Self, ErrorKind> {
        if !(100..=599).contains(&code) {
            return Err(ErrorKind::InvalidStatus);
        }
        Ok(Status {
            code,
            reason: reason.into(),
        })
    }

    /// Parses a status line value of the form `"404 Not Found"`, as it
    /// would appear in a `start_response` call using the textual form of
    /// the gateway contract.
    pub fn parse(status_line: &[u8]) -> Result<Self, ErrorKind> {
        let mut parts = status_line.splitn(2, |&b| b == b' ');
        let code_bytes = parts.next().ok_or(ErrorKind::InvalidStatus)?;
        let reason = parts.next().unwrap_or(b"");
        if code_bytes.len() != 3 || !code_bytes.iter().all(u8::is_ascii_digit) {
            return Err(ErrorKind::InvalidStatus);
        }
        let code = std::str::from_utf8(code_bytes)
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or(ErrorKind::InvalidStatus)?;
        Status::new(code, Bytes::copy_from_slice(reason))
    }

    #[inline]
    pub const fn code(&self) -> u16 {
        self.code
    }

    #[inline]
    pub fn reason(&self) -> &[u8] {
        &self.reason
    }

    #[inline]
    pub(crate) fn is_server_error(&self) -> bool {
        self.code >= 500
    }
}

impl From<StatusCode> for Status {
    fn from(value: StatusCode) -> Self {
        let (code, reason) = value.code_and_reason();
        Status {
            code,
            reason: Bytes::from_static(reason),
        }
    }
}

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// Common HTTP status codes, as a convenience for constructing
        /// [`Status`] values without spelling out the reason phrase.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])*
            $name = $num,
        )+ }

        impl StatusCode {
            pub(crate) const fn code_and_reason(self) -> (u16, &'static [u8]) {
                match self { $(
                    StatusCode::$name => ($num, $str.as_bytes()),
                )+ }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NoContent = (204, "No Content");
    PartialContent = (206, "Partial Content");

    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    LengthRequired = (411, "Length Required");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    ExpectationFailed = (417, "Expectation Failed");
    UnprocessableEntity = (422, "Unprocessable Entity");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

/// A single request or response header, in wire case with an
/// already-lower-cased name cached for lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub(crate) name: Bytes,
    pub(crate) value: Bytes,
}

impl Header {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }

    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    #[inline]
    pub(crate) fn name_eq_ignore_case(&self, other: &[u8]) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

/// An ordered header sequence, preserving original case for trace while
/// supporting case-insensitive lookup — the teacher's `HeaderMap` design,
/// generalized from a fixed-capacity zero-copy buffer to an owned `Vec`
/// since headers here outlive the originating read buffer (they're copied
/// into the environment and handed to the application).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    headers: Vec<Header>,
}

impl HeaderMap {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        HeaderMap {
            headers: Vec::with_capacity(cap),
        }
    }

    /// Appends one header, preserving wire order. Public so an
    /// [`Application`](crate::gateway::Application) outside this crate can
    /// build the `HeaderMap` it hands to `start_response`.
    pub fn push(&mut self, header: Header) {
        self.headers.push(header);
    }

    pub(crate) fn clear(&mut self) {
        self.headers.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// First header value with case-insensitive name matching (RFC 7230 §3.2).
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name_eq_ignore_case(name))
            .map(|h| h.value())
    }

    /// All values for a header name, in wire order (for multi-valued
    /// headers such as repeated `Set-Cookie`).
    pub fn get_all<'a>(&'a self, name: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name_eq_ignore_case(name))
            .map(|h| h.value())
    }

    pub(crate) fn content_length(&self) -> Result<Option<usize>, ErrorKind> {
        let mut found: Option<usize> = None;
        for header in self.headers.iter().filter(|h| h.name_eq_ignore_case(b"content-length")) {
            let value = std::str::from_utf8(header.value())
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(ErrorKind::InvalidContentLength)?;
            match found {
                Some(existing) if existing != value => return Err(ErrorKind::InvalidContentLength),
                _ => found = Some(value),
            }
        }
        Ok(found)
    }

    pub(crate) fn has_chunked_transfer_encoding(&self) -> Result<bool, ErrorKind> {
        let mut saw_chunked_last = false;
        let mut any = false;
        for header in self.headers.iter().filter(|h| h.name_eq_ignore_case(b"transfer-encoding")) {
            any = true;
            let value = header.value().to_ascii_lowercase();
            let codings: Vec<&[u8]> = value.split(|&b| b == b',').map(trim).collect();
            for coding in &codings {
                saw_chunked_last = *coding == b"chunked";
                if *coding != b"chunked" {
                    // Only `chunked` is a supported transfer-coding (spec §4.2 step 2).
                    return Err(ErrorKind::InvalidTransferEncoding);
                }
            }
        }
        Ok(any && saw_chunked_last)
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let mut bytes = bytes;
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_arbitrary_tokens() {
        let m = Method::from_bytes(b"PURGE").unwrap();
        assert_eq!(m.as_str(), "PURGE");
        assert!(!m.is_safe_bodyless());
    }

    #[test]
    fn method_rejects_invalid_tokens() {
        assert!(Method::from_bytes(b"").is_err());
        assert!(Method::from_bytes(b"GET /x").is_err());
    }

    #[test]
    fn version_parses_only_1_0_and_1_1() {
        assert_eq!(Version::from_bytes(b"HTTP/1.1").unwrap(), Version::Http11);
        assert_eq!(Version::from_bytes(b"HTTP/1.0").unwrap(), Version::Http10);
        assert!(Version::from_bytes(b"HTTP/0.9").is_err());
        assert!(Version::from_bytes(b"HTTP/2").is_err());
    }

    #[test]
    fn status_parse_accepts_three_digit_code_and_reason() {
        let s = Status::parse(b"404 Not Found").unwrap();
        assert_eq!(s.code(), 404);
        assert_eq!(s.reason(), b"Not Found");
    }

    #[test]
    fn status_parse_rejects_malformed_code() {
        assert!(Status::parse(b"abc Not Found").is_err());
        assert!(Status::parse(b"42 Too Short").is_err());
    }

    #[test]
    fn header_map_lookup_is_case_insensitive() {
        let mut map = HeaderMap::with_capacity(2);
        map.push(Header::new(&b"Content-Type"[..], &b"text/plain"[..]));
        assert_eq!(map.get(b"content-type"), Some(&b"text/plain"[..]));
    }

    #[test]
    fn content_length_rejects_conflicting_values() {
        let mut map = HeaderMap::with_capacity(2);
        map.push(Header::new(&b"Content-Length"[..], &b"5"[..]));
        map.push(Header::new(&b"Content-Length"[..], &b"6"[..]));
        assert!(map.content_length().is_err());
    }

    #[test]
    fn content_length_allows_repeated_identical_values() {
        let mut map = HeaderMap::with_capacity(2);
        map.push(Header::new(&b"Content-Length"[..], &b"5"[..]));
        map.push(Header::new(&b"Content-Length"[..], &b"5"[..]));
        assert_eq!(map.content_length().unwrap(), Some(5));
    }

    #[test]
    fn transfer_encoding_must_end_in_chunked() {
        let mut map = HeaderMap::with_capacity(1);
        map.push(Header::new(&b"Transfer-Encoding"[..], &b"chunked"[..]));
        assert!(map.has_chunked_transfer_encoding().unwrap());

        let mut map = HeaderMap::with_capacity(1);
        map.push(Header::new(&b"Transfer-Encoding"[..], &b"gzip"[..]));
        assert!(map.has_chunked_transfer_encoding().is_err());
    }
}
