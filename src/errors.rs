//! Protocol and configuration error taxonomy.
//!
//! `ErrorKind` covers per-exchange framing/protocol failures (see spec §7);
//! `as_http` renders the ones that occur pre-body into a synthesized
//! response, following the teacher's `http_errors!` macro technique.
//! `ConfigError` covers the disjoint, fatal-at-startup class (bad listen
//! spec, bind failure, bad hook path).

use crate::http::types::Version;
use std::{error, fmt, io, net::AddrParseError};

/// Per-exchange framing/protocol failure (spec §7). Public because it
/// appears in the public signatures of [`crate::http::types::Status::new`]
/// and [`crate::gateway::StartResponse::start`].
#[derive(Debug)]
pub enum ErrorKind {
    InvalidMethod,
    InvalidUrl,
    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    HeadersTooLarge,
    InvalidContentLength,
    InvalidTransferEncoding,
    InvalidConnection,
    InvalidStatus,

    BodyTooLarge,
    IncompleteEventTooLarge,

    /// The application called `start_response` a second time without
    /// `exc_info`, or after body bytes had already been sent (spec §4.2
    /// step 4 / §8).
    StartResponseMisuse,

    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub fn as_http(&self, version: Version) -> Vec<u8> {
            match self { $(
                Self::$name { .. } => format!(
                    concat!(
                        "{} ", $status_code, "\r\n",
                        "connection: close\r\n",
                        "content-length: ", $len, "\r\n",
                        "content-type: application/json\r\n",
                        "\r\n",
                        $json
                    ),
                    version.as_str(),
                ),
            )* }.into_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;
        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        HeadersTooLarge: "431 Request Header Fields Too Large", "58"
            => r#"{"error":"Header block too large","code":"HEADERS_TOO_LARGE"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidTransferEncoding: "400 Bad Request", "68"
            => r#"{"error":"Invalid Transfer-Encoding","code":"INVALID_TRANSFER_ENCODING"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;
        InvalidStatus: "500 Internal Server Error", "60"
            => r#"{"error":"Invalid application status","code":"INVALID_STATUS"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        IncompleteEventTooLarge: "400 Bad Request", "62"
            => r#"{"error":"Incomplete event too large","code":"EVENT_TOO_LARGE"}"#;

        StartResponseMisuse: "500 Internal Server Error", "64"
            => r#"{"error":"start_response called out of order","code":"BAD_GATEWAY_USAGE"}"#;

        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }

    /// Whether this error can occur only before any response bytes are
    /// sent (and is therefore safe to render as a synthesized response),
    /// versus mid-body, where the connection must simply be aborted
    /// (spec §4.2 step 1, §7).
    pub fn is_pre_body(&self) -> bool {
        !matches!(self, ErrorKind::Io(_))
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub struct IoError(pub io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Fatal, startup-time configuration errors (spec §7): bad `--listen`
/// syntax, bind/listen failure, or an unresolvable hook/app identifier.
/// The binary reports these as a non-zero exit code and a process-sink
/// log line; they never occur mid-request.
#[derive(Debug)]
pub enum ConfigError {
    InvalidListenSpec(String),
    InvalidAddress(AddrParseError),
    Bind { endpoint: String, source: io::Error },
    InvalidHookSpec(String),
    InvalidOctal(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidListenSpec(s) => write!(f, "invalid --listen value: {s}"),
            ConfigError::InvalidAddress(e) => write!(f, "invalid address: {e}"),
            ConfigError::Bind { endpoint, source } => {
                write!(f, "failed to bind {endpoint}: {source}")
            }
            ConfigError::InvalidHookSpec(s) => write!(f, "invalid hook specifier: {s}"),
            ConfigError::InvalidOctal(s) => write!(f, "invalid octal permission value: {s}"),
        }
    }
}

impl error::Error for ConfigError {}

impl From<AddrParseError> for ConfigError {
    fn from(value: AddrParseError) -> Self {
        ConfigError::InvalidAddress(value)
    }
}
