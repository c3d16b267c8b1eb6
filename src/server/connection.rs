//! The per-connection exchange loop (spec §4.2): reads bytes off the
//! socket, drives the framing engine, builds one [`Environment`] per
//! exchange, invokes the gateway application on a blocking thread, and
//! streams whatever it produces back onto the wire before deciding whether
//! the connection stays open for another exchange.
//!
//! Unlike the teacher's `server::connection`, which borrows request data
//! out of a connection-owned, pre-allocated buffer and dispatches to a
//! `Handler<S>` trait tied to that buffer's lifetime, this handler owns
//! everything it hands to the application as [`bytes::Bytes`] — the
//! gateway contract runs the application on a separate blocking thread
//! that outlives any one `poll`, so nothing here can be borrowed from a
//! socket-side buffer.

use crate::{
    config::Scheduling,
    errors::ErrorKind,
    gateway::{self, Application, BodyChannelReader, BodyRequest, BodyResponse, Environment, ErrorsSink, InputStream, ResponseHead, StartResponse},
    http::{
        framing::{Event, FramingEngine, ResponseWriter},
        request::Request,
        response::{OutboundFraming, Response},
        types::{HeaderMap, Method, Status, Version},
    },
    limits::Limits,
    logging,
};
use bytes::Bytes;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Fields constant across every exchange on every connection a worker
/// process serves, computed once at worker startup (spec §3's
/// server-scoped environment entries).
pub(crate) struct ServerIdentity {
    pub(crate) server_name: String,
    pub(crate) server_port: u16,
    pub(crate) url_scheme: String,
    pub(crate) script_name: String,
    pub(crate) scheduling: Scheduling,
    pub(crate) multiprocess: bool,
    /// `--no-access-log` (spec §6): suppresses the one access-log record an
    /// otherwise-successful exchange would emit. Error records are never
    /// suppressed by this flag.
    pub(crate) no_access_log: bool,
}

/// Runs the exchange loop for one accepted connection until the peer or
/// the server ends it. `should_drain` is polled between exchanges so a
/// worker entering its graceful-exit phase can stop offering keep-alive on
/// connections already in flight (spec §4.3, §8 scenario 5) without
/// severing them mid-response.
pub(crate) async fn handle<S, A>(
    mut socket: S,
    peer: Option<SocketAddr>,
    identity: Arc<ServerIdentity>,
    limits: Arc<Limits>,
    app: Arc<A>,
    request_counter: Arc<AtomicU64>,
    should_drain: impl Fn() -> bool,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    A: Application,
{
    let mut engine = FramingEngine::new(limits.framing_limits());
    let mut read_buf = [0u8; 8192];

    loop {
        let started = Instant::now();
        let head = match read_head(&mut socket, &mut engine, &mut read_buf).await {
            Ok(Some(head)) => head,
            Ok(None) => return,
            Err(err) => {
                if err.is_pre_body() {
                    let _ = socket.write_all(&err.as_http(Version::Http11)).await;
                }
                log_exchange_error(None, &connection_log_fields(&identity, peer), &err);
                return;
            }
        };

        // Per spec §4.4's request counter: incremented once per exchange
        // start, not once per accepted connection, so a keep-alive
        // connection serving N requests advances this N times.
        request_counter.fetch_add(1, Ordering::Relaxed);

        let method_str = head.method.as_str().to_string();
        let path_for_log = path_component(&head.target);
        let version = head.version;
        let request_wants_keep_alive = wants_keep_alive(version, &head.headers);
        let method_is_head = head.method.is_head();
        let expects_continue = head.expects_continue;

        let request = Request::new(head.method, head.target, version, head.headers);

        let (body_req_tx, body_req_rx) = mpsc::channel::<BodyRequest>(1);
        let (body_resp_tx, body_resp_rx) = mpsc::channel::<BodyResponse>(1);
        let body_reader = BodyChannelReader::new(body_req_tx, body_resp_rx);
        let env = build_environment(&request, InputStream::over_channel(body_reader), peer, &identity);
        let env_fields = env.cgi_vars();

        let (outcome, continue_sent) = run_exchange(
            app.clone(),
            env,
            version,
            method_is_head,
            &mut socket,
            &mut engine,
            &mut read_buf,
            body_req_rx,
            body_resp_tx,
            expects_continue,
            limits.max_body_size,
        )
        .await;

        log_exchange(&method_str, &path_for_log, &env_fields, &outcome, started.elapsed(), identity.no_access_log);

        // A client holding `Expect: 100-continue` body bytes back, paired
        // with an application that never read `wsgi.input`, has no way to
        // be unblocked short of emitting the interim response this
        // connection never sent — keeping the socket open would hang the
        // next request line behind bytes the client is still waiting to
        // send. Closing here is the safe fallback; spec §4.2 leaves the
        // decision of whether to emit 100-continue to the handler.
        let continue_stalled = expects_continue && !continue_sent && engine.is_awaiting_body();

        let persistent = !continue_stalled
            && match &outcome {
                ExchangeOutcome::Completed { framing, .. } => {
                    request_wants_keep_alive && !should_drain() && *framing != OutboundFraming::Close
                }
                ExchangeOutcome::AbortedPostHeaders => false,
            };

        if !persistent {
            return;
        }

        if engine.is_awaiting_body() {
            if drain_remaining_body(&mut socket, &mut engine, &mut read_buf).await.is_err() {
                return;
            }
        }

        engine.start_next_cycle();
    }
}

struct RequestHead {
    method: Method,
    target: Bytes,
    version: Version,
    headers: HeaderMap,
    expects_continue: bool,
}

fn path_component(target: &[u8]) -> String {
    let path = target.split(|&b| b == b'?').next().unwrap_or(target);
    String::from_utf8_lossy(path).into_owned()
}

/// Reads from the socket until a full request head (method/target/version
/// plus headers) has been parsed, or the connection closes before one
/// arrives. Returns `Ok(None)` for a clean close between exchanges —
/// distinct from a close mid-head, which is a protocol error.
async fn read_head<S: AsyncRead + Unpin>(
    socket: &mut S,
    engine: &mut FramingEngine,
    read_buf: &mut [u8],
) -> Result<Option<RequestHead>, ErrorKind> {
    loop {
        match engine.next_event()? {
            Event::NeedData => {
                let n = socket.read(read_buf).await?;
                if n == 0 {
                    engine.note_eof();
                    continue;
                }
                engine.receive(&read_buf[..n]);
            }
            Event::Request {
                method,
                target,
                version,
                headers,
            } => {
                let expects_continue = headers
                    .get(b"expect")
                    .map(|v| v.eq_ignore_ascii_case(b"100-continue"))
                    .unwrap_or(false);
                return Ok(Some(RequestHead {
                    method,
                    target,
                    version,
                    headers,
                    expects_continue,
                }));
            }
            Event::ConnectionClosed => return Ok(None),
            Event::Paused | Event::Data(_) | Event::EndOfMessage => {
                unreachable!("framing engine produced a body event before a request head")
            }
        }
    }
}

/// Reads exactly one unit of body progress: the next `Data` chunk, or
/// `None` once `EndOfMessage` is reached. Driven one pull at a time from
/// [`run_exchange`]'s body-servicing loop in lockstep with the
/// application's own `wsgi.input.read()` calls — nothing here accumulates
/// the whole body, per spec §4.2's lazy, first-read-triggered body
/// delivery.
async fn read_body_chunk<S: AsyncRead + Unpin>(
    socket: &mut S,
    engine: &mut FramingEngine,
    read_buf: &mut [u8],
    bytes_read_so_far: &mut usize,
    cap: Option<usize>,
) -> Result<Option<Bytes>, ErrorKind> {
    loop {
        match engine.next_event()? {
            Event::NeedData => {
                let n = socket.read(read_buf).await?;
                if n == 0 {
                    engine.note_eof();
                    continue;
                }
                engine.receive(&read_buf[..n]);
            }
            Event::Data(chunk) => {
                *bytes_read_so_far += chunk.len();
                if let Some(cap) = cap {
                    if *bytes_read_so_far > cap {
                        return Err(ErrorKind::BodyTooLarge);
                    }
                }
                return Ok(Some(chunk));
            }
            Event::EndOfMessage => return Ok(None),
            Event::ConnectionClosed => {
                return Err(ErrorKind::from(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-body",
                )))
            }
            Event::Request { .. } | Event::Paused => {
                unreachable!("framing engine re-parsed a head while awaiting body")
            }
        }
    }
}

/// Discards whatever body bytes the application never read, so a
/// keep-alive connection's next request line doesn't get misparsed as a
/// continuation of this exchange's body (spec §4.2 step 6's "reset
/// framing engine and loop" implicitly requires the engine to actually be
/// caught up first).
async fn drain_remaining_body<S: AsyncRead + Unpin>(
    socket: &mut S,
    engine: &mut FramingEngine,
    read_buf: &mut [u8],
) -> Result<(), ErrorKind> {
    loop {
        match engine.next_event()? {
            Event::NeedData => {
                let n = socket.read(read_buf).await?;
                if n == 0 {
                    engine.note_eof();
                    continue;
                }
                engine.receive(&read_buf[..n]);
            }
            Event::Data(_) => continue,
            Event::EndOfMessage | Event::Paused => return Ok(()),
            Event::ConnectionClosed => {
                return Err(ErrorKind::from(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed while draining unread body",
                )))
            }
            Event::Request { .. } => unreachable!("framing engine re-parsed a head while draining body"),
        }
    }
}

fn build_environment(request: &Request, input: InputStream, peer: Option<SocketAddr>, identity: &ServerIdentity) -> Environment {
    let (host_name, host_port) = host_header_parts(request.headers().get(b"host"));
    let server_name = host_name.unwrap_or_else(|| identity.server_name.clone());
    let server_port = host_port.unwrap_or(identity.server_port);
    let (remote_addr, remote_port) = gateway::peer_addr_parts(peer.map(|p| p.ip()), peer.map(|p| p.port()).unwrap_or(0));

    let path_info = String::from_utf8_lossy(&percent_decode(request.path())).into_owned();
    let query_string = String::from_utf8_lossy(request.query()).into_owned();

    Environment {
        request_method: request.method().as_str().to_string(),
        script_name: identity.script_name.clone(),
        path_info,
        query_string,
        server_protocol: request.version().as_str(),
        server_name,
        server_port,
        remote_addr,
        remote_port,
        headers: request.headers().clone(),
        input,
        url_scheme: identity.url_scheme.clone(),
        errors: ErrorsSink::new(request.method().as_str(), request.path()),
        multithread: matches!(identity.scheduling, Scheduling::Threaded),
        multiprocess: identity.multiprocess,
        run_once: false,
    }
}

/// The subset of `Environment`'s CGI-style fields known before a request
/// head has even been parsed — server identity plus whatever the peer
/// socket reports. Used for the error log record a head-parse failure
/// produces, when there is no `Request` yet to build a full `Environment`
/// from (spec §6 "Log record schema" still wants `SERVER_NAME`/
/// `SERVER_PORT`/`REMOTE_ADDR`/`REMOTE_PORT` on that record).
fn connection_log_fields(identity: &ServerIdentity, peer: Option<SocketAddr>) -> Vec<(String, String)> {
    let (remote_addr, remote_port) = gateway::peer_addr_parts(peer.map(|p| p.ip()), peer.map(|p| p.port()).unwrap_or(0));
    vec![
        ("SERVER_NAME".to_string(), identity.server_name.clone()),
        ("SERVER_PORT".to_string(), identity.server_port.to_string()),
        ("REMOTE_ADDR".to_string(), remote_addr),
        ("REMOTE_PORT".to_string(), remote_port.to_string()),
    ]
}

/// Splits a `Host` header into name/port, as a fallback source for
/// `SERVER_NAME`/`SERVER_PORT` ahead of the bound-socket default (spec
/// §4.2 step 3).
fn host_header_parts(host: Option<&[u8]>) -> (Option<String>, Option<u16>) {
    let host = match host.and_then(|h| std::str::from_utf8(h).ok()) {
        Some(h) => h,
        None => return (None, None),
    };
    match host.rsplit_once(':') {
        Some((name, port)) => (Some(name.to_string()), port.parse().ok()),
        None => (Some(host.to_string()), None),
    }
}

fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(input[i + 1]), hex_digit(input[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn wants_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    match headers.get(b"connection") {
        Some(value) => {
            let lower = value.to_ascii_lowercase();
            if has_token(&lower, b"close") {
                false
            } else if has_token(&lower, b"keep-alive") {
                true
            } else {
                version.default_keep_alive()
            }
        }
        None => version.default_keep_alive(),
    }
}

fn has_token(csv: &[u8], token: &[u8]) -> bool {
    csv.split(|&b| b == b',').any(|part| trim_ascii(part) == token)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let bytes = &bytes[start..];
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(0);
    &bytes[..end]
}

enum ExchangeOutcome {
    Completed {
        status: u16,
        framing: OutboundFraming,
        bytes_sent: u64,
    },
    /// The application panicked after headers were already flushed; per
    /// spec §7 the connection is simply dropped with no further bytes.
    AbortedPostHeaders,
}

enum AppEvent {
    Head(Status, HeaderMap),
    Chunk(Bytes),
    Done,
    Panicked { message: String },
}

/// Invokes the application on a blocking thread and streams its response
/// back over `socket`, honoring the framing decision and HEAD's
/// body-suppression (spec §4.2 steps 4-6, §8's HEAD testable property).
///
/// Concurrently with driving the application's [`AppEvent`]s, this also
/// services the application's `wsgi.input.read()` calls — delivered here
/// as [`BodyRequest::Pull`]s over `body_req_rx` — since the connection
/// task alone owns `socket` and `engine` (spec §9: the application may
/// block arbitrarily on its own thread, so only this task ever touches the
/// wire). The first pull, if the request carried `Expect: 100-continue`,
/// emits the interim response before reading anything (spec §4.2 step 3's
/// "first read" timing). Returns whether that interim response was ever
/// sent, so the caller can decide what to do about a connection left
/// holding unread, continue-gated body bytes.
#[allow(clippy::too_many_arguments)]
async fn run_exchange<S, A>(
    app: Arc<A>,
    env: Environment,
    version: Version,
    suppress_body: bool,
    socket: &mut S,
    engine: &mut FramingEngine,
    read_buf: &mut [u8],
    mut body_req_rx: mpsc::Receiver<BodyRequest>,
    body_resp_tx: mpsc::Sender<BodyResponse>,
    expects_continue: bool,
    max_body_size: Option<usize>,
) -> (ExchangeOutcome, bool)
where
    S: AsyncRead + AsyncWrite + Unpin,
    A: Application,
{
    let (tx, mut rx) = mpsc::channel::<AppEvent>(8);
    tokio::task::spawn_blocking(move || run_application(app, env, tx));

    let mut continue_sent = false;
    let mut body_done = false;
    let mut bytes_read = 0usize;

    macro_rules! service_body_pull {
        ($req:expr) => {
            match $req {
                Some(BodyRequest::Pull) => {
                    if expects_continue && !continue_sent {
                        if socket.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.is_err() {
                            return (ExchangeOutcome::AbortedPostHeaders, continue_sent);
                        }
                        continue_sent = true;
                    }
                    match read_body_chunk(socket, engine, read_buf, &mut bytes_read, max_body_size).await {
                        Ok(Some(chunk)) => {
                            let _ = body_resp_tx.send(BodyResponse::Chunk(chunk)).await;
                        }
                        Ok(None) => {
                            body_done = true;
                            let _ = body_resp_tx.send(BodyResponse::End).await;
                        }
                        Err(err) => {
                            body_done = true;
                            let _ = body_resp_tx.send(BodyResponse::Err(err.to_string())).await;
                        }
                    }
                }
                None => body_done = true,
            }
        };
    }

    let (status, headers) = loop {
        tokio::select! {
            biased;
            req = body_req_rx.recv(), if !body_done => service_body_pull!(req),
            event = rx.recv() => {
                match event {
                    Some(AppEvent::Head(status, headers)) => break (status, headers),
                    _ => {
                        let err = ErrorKind::StartResponseMisuse;
                        let _ = socket.write_all(&err.as_http(version)).await;
                        return (
                            ExchangeOutcome::Completed {
                                status: 500,
                                framing: OutboundFraming::Close,
                                bytes_sent: 0,
                            },
                            continue_sent,
                        );
                    }
                }
            }
        }
    };

    let response = Response::new(status, headers);
    let framing = response.framing_for(version);
    let status_code = response.status().code();

    let mut out = Vec::with_capacity(256);
    ResponseWriter::write_status_line(&mut out, version, response.status());
    for header in response.headers().iter() {
        ResponseWriter::write_header(&mut out, header.name(), header.value());
    }
    ResponseWriter::write_header(&mut out, b"date", httpdate::fmt_http_date(std::time::SystemTime::now()).as_bytes());
    ResponseWriter::write_header(&mut out, b"server", b"zibai");
    match framing {
        OutboundFraming::ContentLength(len) => {
            ResponseWriter::write_header(&mut out, b"content-length", len.to_string().as_bytes());
        }
        OutboundFraming::Chunked => {
            ResponseWriter::write_header(&mut out, b"transfer-encoding", b"chunked");
        }
        OutboundFraming::Close => {
            ResponseWriter::write_header(&mut out, b"connection", b"close");
        }
    }
    ResponseWriter::write_headers_end(&mut out);
    if socket.write_all(&out).await.is_err() {
        return (ExchangeOutcome::AbortedPostHeaders, continue_sent);
    }

    let mut bytes_sent: u64 = 0;
    loop {
        let event = tokio::select! {
            biased;
            req = body_req_rx.recv(), if !body_done => {
                service_body_pull!(req);
                continue;
            }
            event = rx.recv() => event,
        };
        match event {
            Some(AppEvent::Chunk(chunk)) => {
                bytes_sent += chunk.len() as u64;
                if suppress_body {
                    continue;
                }
                let mut framed = Vec::with_capacity(chunk.len() + 16);
                match framing {
                    OutboundFraming::Chunked => ResponseWriter::write_chunk(&mut framed, &chunk),
                    _ => framed.extend_from_slice(&chunk),
                }
                if socket.write_all(&framed).await.is_err() {
                    return (ExchangeOutcome::AbortedPostHeaders, continue_sent);
                }
            }
            Some(AppEvent::Done) | None => break,
            Some(AppEvent::Panicked { .. }) => return (ExchangeOutcome::AbortedPostHeaders, continue_sent),
            Some(AppEvent::Head(..)) => unreachable!("start_response already consumed"),
        }
    }

    if !suppress_body && matches!(framing, OutboundFraming::Chunked) {
        let mut tail = Vec::new();
        ResponseWriter::write_last_chunk(&mut tail);
        if socket.write_all(&tail).await.is_err() {
            return (ExchangeOutcome::AbortedPostHeaders, continue_sent);
        }
    }

    (
        ExchangeOutcome::Completed {
            status: status_code,
            framing,
            bytes_sent,
        },
        continue_sent,
    )
}

/// Runs on a `spawn_blocking` thread: drives the synchronous application
/// contract and reports progress back as [`AppEvent`]s, mapping a Rust
/// panic onto the pre-header/post-header exception split of spec §7 via
/// `catch_unwind` rather than letting it cross the thread boundary.
fn run_application<A: Application>(app: Arc<A>, env: Environment, tx: mpsc::Sender<AppEvent>) {
    use std::cell::RefCell;

    let state = RefCell::new(ResponseHead::default());
    let call_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let start_response = StartResponse::new(&state);
        app.call(env, start_response)
    }));

    let mut body = match call_result {
        Ok(body) => body,
        Err(payload) => {
            let _ = tx.blocking_send(AppEvent::Panicked {
                message: panic_message(&payload),
            });
            return;
        }
    };

    let response_head = state.into_inner();
    let Some((status, headers)) = response_head.head else {
        let _ = tx.blocking_send(AppEvent::Panicked {
            message: "application never called start_response".to_string(),
        });
        return;
    };
    if tx.blocking_send(AppEvent::Head(status, headers)).is_err() {
        return;
    }

    // Bytes handed to the write-callable are queued ahead of whatever
    // `Body` the application subsequently returns (spec §3, §9).
    for chunk in response_head.written {
        if tx.blocking_send(AppEvent::Chunk(chunk)).is_err() {
            return;
        }
    }

    loop {
        let next = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body.next()));
        match next {
            Ok(Some(chunk)) => {
                if tx.blocking_send(AppEvent::Chunk(chunk)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = tx.blocking_send(AppEvent::Done);
                return;
            }
            Err(payload) => {
                let _ = tx.blocking_send(AppEvent::Panicked {
                    message: panic_message(&payload),
                });
                return;
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "application panicked".to_string()
    }
}

/// Emits one access or error record per exchange, carrying the full CGI-style
/// environment as structured fields (spec §6 "Log record schema") alongside
/// the outcome. `env_fields` is the `Environment::cgi_vars()` snapshot taken
/// before the environment was handed to the application.
fn log_exchange(
    method: &str,
    path: &str,
    env_fields: &[(String, String)],
    outcome: &ExchangeOutcome,
    elapsed: std::time::Duration,
    no_access_log: bool,
) {
    match outcome {
        ExchangeOutcome::Completed { status, bytes_sent, .. } => {
            let is_error = *status >= 500;
            if no_access_log && !is_error {
                return;
            }
            let target = if is_error { logging::ERROR } else { logging::ACCESS };
            tracing::info!(
                target: target,
                method,
                path,
                environment = ?env_fields,
                status = *status,
                bytes_sent = *bytes_sent,
                duration_ms = elapsed.as_secs_f64() * 1000.0,
                "exchange completed"
            );
        }
        ExchangeOutcome::AbortedPostHeaders => {
            tracing::warn!(
                target: logging::ERROR,
                method,
                path,
                environment = ?env_fields,
                duration_ms = elapsed.as_secs_f64() * 1000.0,
                "application raised after headers were sent; connection aborted"
            );
        }
    }
}

fn log_exchange_error(head: Option<&RequestHead>, env_fields: &[(String, String)], err: &ErrorKind) {
    tracing::warn!(
        target: logging::ERROR,
        method = head.map(|h| h.method.as_str()).unwrap_or(""),
        environment = ?env_fields,
        error = %err,
        "exchange failed before a response could be produced"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::Header;

    #[test]
    fn host_header_splits_name_and_port() {
        assert_eq!(
            host_header_parts(Some(b"example.com:8080")),
            (Some("example.com".to_string()), Some(8080))
        );
    }

    #[test]
    fn host_header_without_port_leaves_port_none() {
        assert_eq!(host_header_parts(Some(b"example.com")), (Some("example.com".to_string()), None));
    }

    #[test]
    fn host_header_absent_yields_none() {
        assert_eq!(host_header_parts(None), (None, None));
    }

    #[test]
    fn percent_decode_handles_encoded_bytes() {
        assert_eq!(percent_decode(b"/a%20b%2Fc"), b"/a b/c");
    }

    #[test]
    fn percent_decode_passes_through_invalid_escapes() {
        assert_eq!(percent_decode(b"/100%"), b"/100%");
        assert_eq!(percent_decode(b"/%zz"), b"/%zz");
    }

    #[test]
    fn keep_alive_defaults_follow_version() {
        let empty = HeaderMap::with_capacity(0);
        assert!(wants_keep_alive(Version::Http11, &empty));
        assert!(!wants_keep_alive(Version::Http10, &empty));
    }

    #[test]
    fn keep_alive_honors_explicit_connection_header() {
        let mut close_hdr = HeaderMap::with_capacity(1);
        close_hdr.push(Header::new(&b"Connection"[..], &b"close"[..]));
        assert!(!wants_keep_alive(Version::Http11, &close_hdr));

        let mut keep_hdr = HeaderMap::with_capacity(1);
        keep_hdr.push(Header::new(&b"Connection"[..], &b"keep-alive"[..]));
        assert!(wants_keep_alive(Version::Http10, &keep_hdr));
    }

    #[test]
    fn path_component_drops_query_string() {
        assert_eq!(path_component(b"/a/b?x=1"), "/a/b");
    }

    #[test]
    fn panic_message_extracts_str_payload() {
        let result: std::thread::Result<()> = std::panic::catch_unwind(|| panic!("boom"));
        let payload = result.unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");
    }
}
