//! The inbound request representation, assembled by the connection handler
//! from [`crate::http::framing`] events (spec §4.2 steps 2-3).
//!
//! Unlike the teacher's `Request`, which borrows `&'static` slices out of a
//! reused per-connection read buffer via an unsafe lifetime transmute, this
//! `Request` owns its data as [`Bytes`]. The gateway contract hands the
//! request to application code that outlives the original socket read, so
//! there's no buffer left to borrow from safely.
//!
//! The body itself is not a field here: it streams lazily through
//! [`crate::gateway::InputStream`] straight from the socket, on the
//! application's own first read, rather than being accumulated up front
//! (spec §4.2's "first read" `Expect: 100-continue` timing).

use crate::http::types::{HeaderMap, Method, Version};
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: Bytes,
    path: Bytes,
    query: Bytes,
    version: Version,
    headers: HeaderMap,
}

impl Request {
    pub(crate) fn new(method: Method, target: Bytes, version: Version, headers: HeaderMap) -> Self {
        let (path, query) = split_target(&target);
        Request {
            method,
            target,
            path,
            query,
            version,
            headers,
        }
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    /// The path component of the request target, percent-encoding left
    /// intact (decoding is the environment layer's job — spec §4.2 step 3).
    #[inline]
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// The raw query string, not including the leading `?`. Empty if absent.
    #[inline]
    pub fn query(&self) -> &[u8] {
        &self.query
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }
}

fn split_target(target: &Bytes) -> (Bytes, Bytes) {
    match memchr::memchr(b'?', target) {
        Some(pos) => (target.slice(..pos), target.slice(pos + 1..)),
        None => (target.clone(), Bytes::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(target: &str) -> Request {
        Request::new(
            Method::from_bytes(b"GET").unwrap(),
            Bytes::copy_from_slice(target.as_bytes()),
            Version::Http11,
            HeaderMap::with_capacity(0),
        )
    }

    #[test]
    fn splits_path_and_query() {
        let r = req("/api/users?sort=name&id=5");
        assert_eq!(r.path(), b"/api/users");
        assert_eq!(r.query(), b"sort=name&id=5");
    }

    #[test]
    fn path_without_query_leaves_query_empty() {
        let r = req("/api/users");
        assert_eq!(r.path(), b"/api/users");
        assert_eq!(r.query(), b"");
    }

    #[test]
    fn root_with_bare_question_mark() {
        let r = req("/?");
        assert_eq!(r.path(), b"/");
        assert_eq!(r.query(), b"");
    }
}
