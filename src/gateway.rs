//! The gateway application contract (spec §3 "Environment"/"Response",
//! §4.2 step 4, §9): the synchronous request-environment/start-response
//! interface the server hosts an application through.
//!
//! The gateway application itself is an external collaborator (spec §1);
//! this module only defines the boundary it's invoked across:
//! [`Environment`] (built once per exchange), [`StartResponse`] (the
//! callback that records the app's chosen status/headers, enforcing the
//! single-call-before-bytes-sent invariant of spec §3/§8), and [`Body`]
//! (the lazy, once-only byte-chunk sequence the app returns, with an
//! optional scoped release run via `Drop` — spec §9's "lazy finite
//! byte-chunk sequence with an optional scoped release").

use crate::http::types::{HeaderMap, Status};
use crate::{errors::ErrorKind, logging};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::IpAddr;

/// The request-side half of the gateway contract (spec §3's "Environment"),
/// built by the connection handler once headers have arrived and torn down
/// when the exchange completes. The application must not retain references
/// past its `call` returning.
pub struct Environment {
    pub request_method: String,
    pub script_name: String,
    pub path_info: String,
    pub query_string: String,
    pub server_protocol: &'static str,
    pub server_name: String,
    pub server_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    pub headers: HeaderMap,
    pub input: InputStream,
    pub url_scheme: String,
    pub errors: ErrorsSink,
    pub multithread: bool,
    pub multiprocess: bool,
    pub run_once: bool,
}

impl Environment {
    /// Looks up an `HTTP_*` environment entry the way a CGI-style gateway
    /// consumer expects: the header name upper-cased with hyphens turned to
    /// underscores, e.g. `"HTTP_USER_AGENT"`.
    pub fn http(&self, cgi_name: &str) -> Option<&[u8]> {
        let wire_name = cgi_name.strip_prefix("HTTP_")?.replace('_', "-");
        self.headers.get(wire_name.as_bytes())
    }

    /// The full set of CGI/WSGI-style environment entries as string pairs,
    /// for a caller that wants the literal mapping named in spec §3 rather
    /// than typed field access.
    pub fn cgi_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("REQUEST_METHOD".to_string(), self.request_method.clone()),
            ("SCRIPT_NAME".to_string(), self.script_name.clone()),
            ("PATH_INFO".to_string(), self.path_info.clone()),
            ("QUERY_STRING".to_string(), self.query_string.clone()),
            ("SERVER_PROTOCOL".to_string(), self.server_protocol.to_string()),
            ("SERVER_NAME".to_string(), self.server_name.clone()),
            ("SERVER_PORT".to_string(), self.server_port.to_string()),
            ("REMOTE_ADDR".to_string(), self.remote_addr.clone()),
            ("REMOTE_PORT".to_string(), self.remote_port.to_string()),
            ("wsgi.url_scheme".to_string(), self.url_scheme.clone()),
        ];
        for header in self.headers.iter() {
            let name = String::from_utf8_lossy(header.name()).to_uppercase().replace('-', "_");
            let value = String::from_utf8_lossy(header.value()).into_owned();
            vars.push((format!("HTTP_{name}"), value));
        }
        vars
    }
}

/// A readable byte stream over the request body (spec §3's `wsgi.input`).
///
/// Reads are lazy: the connection handler does not pull a single byte off
/// the socket, nor send a pending `Expect: 100-continue` interim response,
/// until the application actually calls `read` here (spec §4.2's "100
/// Continue on first read" timing). A request handler that rejects a
/// request without ever touching `wsgi.input` — bad auth, a routing
/// mismatch — never forces a continue response or a body read that was
/// never needed. Reading runs on the application's own blocking thread, so
/// each read is a synchronous round-trip over a channel back to the
/// connection task, which alone owns the socket and the framing engine.
pub struct InputStream {
    source: InputSource,
}

enum InputSource {
    Memory(io::Cursor<Bytes>),
    Channel(BodyChannelReader),
}

impl InputStream {
    /// A stream reading from an already-complete, in-memory body. Used by
    /// unit tests and by any caller that already holds the whole body as
    /// `Bytes` rather than a live connection to stream it from.
    pub fn new(body: Bytes) -> Self {
        InputStream {
            source: InputSource::Memory(io::Cursor::new(body)),
        }
    }

    pub(crate) fn over_channel(reader: BodyChannelReader) -> Self {
        InputStream {
            source: InputSource::Channel(reader),
        }
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            InputSource::Memory(cursor) => cursor.read(buf),
            InputSource::Channel(reader) => reader.read(buf),
        }
    }
}

/// One request for the next slice of body bytes, sent from the
/// application's blocking thread to the connection task over
/// [`tokio::sync::mpsc`] (spec §9: the application may block arbitrarily,
/// so only the connection task may touch the socket).
pub(crate) enum BodyRequest {
    Pull,
}

/// The connection task's answer to a [`BodyRequest::Pull`].
pub(crate) enum BodyResponse {
    Chunk(Bytes),
    End,
    Err(String),
}

/// The blocking-thread side of the body channel: turns [`Read::read`]
/// calls into [`BodyRequest::Pull`] round-trips, holding onto whatever
/// chunk came back until it's fully consumed by the caller's buffer.
pub(crate) struct BodyChannelReader {
    request_tx: tokio::sync::mpsc::Sender<BodyRequest>,
    response_rx: tokio::sync::mpsc::Receiver<BodyResponse>,
    leftover: Bytes,
    done: bool,
}

impl BodyChannelReader {
    pub(crate) fn new(
        request_tx: tokio::sync::mpsc::Sender<BodyRequest>,
        response_rx: tokio::sync::mpsc::Receiver<BodyResponse>,
    ) -> Self {
        BodyChannelReader {
            request_tx,
            response_rx,
            leftover: Bytes::new(),
            done: false,
        }
    }
}

impl Read for BodyChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.leftover.is_empty() {
            if self.done {
                return Ok(0);
            }
            if self.request_tx.blocking_send(BodyRequest::Pull).is_err() {
                self.done = true;
                return Ok(0);
            }
            match self.response_rx.blocking_recv() {
                Some(BodyResponse::Chunk(chunk)) => self.leftover = chunk,
                Some(BodyResponse::End) | None => {
                    self.done = true;
                    return Ok(0);
                }
                Some(BodyResponse::Err(message)) => {
                    self.done = true;
                    return Err(io::Error::new(io::ErrorKind::Other, message));
                }
            }
        }
        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover = self.leftover.split_off(n);
        Ok(n)
    }
}

/// A writable line sink for the application's own diagnostics (spec §3's
/// `wsgi.errors`). Forwards each line to the `error` log target with the
/// environment's method/path attached, rather than handing the application
/// a raw file handle — there is no dedicated error-sink file in this
/// design, per spec §9's "pass sinks via a context value."
#[derive(Clone)]
pub struct ErrorsSink {
    pub(crate) method: String,
    pub(crate) path: String,
}

impl ErrorsSink {
    pub(crate) fn new(method: &str, path: &[u8]) -> Self {
        ErrorsSink {
            method: method.to_string(),
            path: String::from_utf8_lossy(path).into_owned(),
        }
    }

    /// Writes one diagnostic line from the application to the `error` sink.
    pub fn write_line(&self, line: &str) {
        tracing::event!(
            target: logging::ERROR,
            tracing::Level::WARN,
            method = %self.method,
            path = %self.path,
            app_message = %line,
            "application diagnostic"
        );
    }
}

impl std::fmt::Write for ErrorsSink {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        for line in s.lines() {
            self.write_line(line);
        }
        Ok(())
    }
}

/// Shared state `start_response` writes into and the connection handler
/// reads back out of once the application's `call` returns (spec §3, §4.2
/// step 4, §8).
#[derive(Default)]
pub(crate) struct ResponseHead {
    pub(crate) head: Option<(Status, HeaderMap)>,
    pub(crate) bytes_sent: bool,
    /// Chunks handed to the write-callable (spec §3's write-callable
    /// return from `start_response`), queued here until the connection
    /// handler has the application's own `Body` to stream alongside —
    /// they're drained first, ahead of `Body`'s own items.
    pub(crate) written: VecDeque<Bytes>,
}

/// The `start_response(status, headers, exc_info?)` callback (spec §3,
/// §4.2 step 4). Returns a write-callable on success; repeated invocation
/// is permitted only before any body byte is transmitted and only when
/// `exc_info` is set (an error-path replacement of an earlier call) —
/// otherwise it's rejected as a protocol-usage error surfaced to the
/// application rather than silently accepted.
pub struct StartResponse<'a> {
    state: &'a RefCell<ResponseHead>,
}

impl<'a> StartResponse<'a> {
    pub(crate) fn new(state: &'a RefCell<ResponseHead>) -> Self {
        StartResponse { state }
    }

    pub fn start(
        &self,
        status: Status,
        headers: HeaderMap,
        exc_info: bool,
    ) -> Result<Writer<'a>, ErrorKind> {
        let mut state = self.state.borrow_mut();
        if state.head.is_some() && (!exc_info || state.bytes_sent) {
            return Err(ErrorKind::StartResponseMisuse);
        }
        state.head = Some((status, headers));
        Ok(Writer { state: self.state })
    }
}

/// The write-callable `start_response` returns (rarely used directly by
/// applications that instead return their body via the `Body` iterable,
/// but part of the documented contract). Bytes written here are queued
/// ahead of whatever `Body` the application subsequently returns.
pub struct Writer<'a> {
    state: &'a RefCell<ResponseHead>,
}

impl<'a> Writer<'a> {
    pub fn write(&self, chunk: Bytes) -> Bytes {
        let mut state = self.state.borrow_mut();
        state.bytes_sent = true;
        state.written.push_back(chunk.clone());
        chunk
    }
}

/// The finite, once-only, lazy byte-chunk sequence an application returns
/// from `call` (spec §3 Response body, §9's "lazy finite byte-chunk
/// sequence with an optional scoped release"). The optional release
/// callback is invoked via `Drop`, Rust's native scoped-resource idiom,
/// after the last chunk is taken or when the body is dropped without being
/// fully drained (an aborted exchange, spec §7).
pub struct Body {
    iter: Box<dyn Iterator<Item = Bytes> + Send>,
    close: Option<Box<dyn FnOnce() + Send>>,
}

impl Body {
    pub fn new(iter: impl Iterator<Item = Bytes> + Send + 'static) -> Self {
        Body {
            iter: Box::new(iter),
            close: None,
        }
    }

    pub fn empty() -> Self {
        Body::new(std::iter::empty())
    }

    /// Attaches a release callback run once, when the body is dropped
    /// (spec §9).
    pub fn with_close(mut self, close: impl FnOnce() + Send + 'static) -> Self {
        self.close = Some(Box::new(close));
        self
    }
}

impl Iterator for Body {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.iter.next()
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

/// The gateway application (spec §1, §9): user code conforming to the
/// synchronous request-environment/start-response contract. Invoked via
/// `spawn_blocking` by the connection handler, since the contract is
/// explicitly synchronous and may block arbitrarily (spec §5) — the
/// worker pool's bounded concurrency, not an async-friendly signature, is
/// what keeps that safe.
pub trait Application: Send + Sync + 'static {
    fn call(&self, env: Environment, start_response: StartResponse<'_>) -> Body;
}

impl<F> Application for F
where
    F: Fn(Environment, StartResponse<'_>) -> Body + Send + Sync + 'static,
{
    fn call(&self, env: Environment, start_response: StartResponse<'_>) -> Body {
        self(env, start_response)
    }
}

pub(crate) fn peer_addr_parts(addr: Option<IpAddr>, port: u16) -> (String, u16) {
    match addr {
        Some(ip) => (ip.to_string(), port),
        None => (String::new(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::{Header, StatusCode};

    #[test]
    fn start_response_rejects_second_call_without_exc_info() {
        let state = RefCell::new(ResponseHead::default());
        let sr = StartResponse::new(&state);
        sr.start(StatusCode::Ok.into(), HeaderMap::with_capacity(0), false)
            .unwrap();
        assert!(sr
            .start(StatusCode::InternalServerError.into(), HeaderMap::with_capacity(0), false)
            .is_err());
    }

    #[test]
    fn start_response_allows_replacement_before_bytes_sent_with_exc_info() {
        let state = RefCell::new(ResponseHead::default());
        let sr = StartResponse::new(&state);
        sr.start(StatusCode::Ok.into(), HeaderMap::with_capacity(0), false)
            .unwrap();
        assert!(sr
            .start(StatusCode::InternalServerError.into(), HeaderMap::with_capacity(0), true)
            .is_ok());
    }

    #[test]
    fn start_response_rejects_replacement_after_bytes_sent() {
        let state = RefCell::new(ResponseHead::default());
        let sr = StartResponse::new(&state);
        let writer = sr
            .start(StatusCode::Ok.into(), HeaderMap::with_capacity(0), false)
            .unwrap();
        writer.write(Bytes::from_static(b"x"));
        assert!(sr
            .start(StatusCode::InternalServerError.into(), HeaderMap::with_capacity(0), true)
            .is_err());
    }

    #[test]
    fn body_runs_close_callback_on_drop() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let closed = Arc::new(AtomicBool::new(false));
        let closed2 = closed.clone();
        let body = Body::new(std::iter::once(Bytes::from_static(b"x")))
            .with_close(move || closed2.store(true, Ordering::SeqCst));
        drop(body);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn environment_http_lookup_maps_cgi_name_to_header() {
        let mut headers = HeaderMap::with_capacity(1);
        headers.push(Header::new(&b"User-Agent"[..], &b"curl/8.0"[..]));
        let env = Environment {
            request_method: "GET".into(),
            script_name: String::new(),
            path_info: "/".into(),
            query_string: String::new(),
            server_protocol: "HTTP/1.1",
            server_name: "localhost".into(),
            server_port: 80,
            remote_addr: String::new(),
            remote_port: 0,
            headers,
            input: InputStream::new(Bytes::new()),
            url_scheme: "http".into(),
            errors: ErrorsSink::new("GET", b"/"),
            multithread: true,
            multiprocess: false,
            run_once: false,
        };
        assert_eq!(env.http("HTTP_USER_AGENT"), Some(&b"curl/8.0"[..]));
    }
}
