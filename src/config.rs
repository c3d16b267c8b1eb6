//! Assembled server configuration: listen endpoints, scheduling mode,
//! lifecycle hooks, and the knobs in spec §6's CLI surface.
//!
//! [`Config`] is built programmatically for library use, or from the
//! `zibai` binary's `clap`-derived `Cli` (see `src/main.rs`), matching
//! exactly the CLI surface in spec §6. Octal permission parsing and listen
//! spec parsing reuse small hand-written parsers in the teacher's terse
//! utility-function style rather than pulling in a dedicated crate for
//! either.

use crate::errors::ConfigError;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

/// A listen endpoint: either a TCP socket or (on Unix) a domain socket
/// (spec §3's "Listen endpoint" data model).
#[derive(Debug, Clone)]
pub enum ListenEndpoint {
    Tcp {
        addr: SocketAddr,
        dualstack_ipv6: bool,
    },
    #[cfg(unix)]
    Unix { path: PathBuf, mode: u32 },
}

impl ListenEndpoint {
    /// Parses one `--listen` value: `HOST:PORT` or `unix:PATH`.
    pub fn parse(spec: &str, dualstack_ipv6: bool, unix_socket_perms: u32) -> Result<Self, ConfigError> {
        if let Some(path) = spec.strip_prefix("unix:") {
            #[cfg(unix)]
            {
                return Ok(ListenEndpoint::Unix {
                    path: PathBuf::from(path),
                    mode: unix_socket_perms,
                });
            }
            #[cfg(not(unix))]
            {
                let _ = (path, unix_socket_perms);
                return Err(ConfigError::InvalidListenSpec(spec.to_string()));
            }
        }

        let addr: SocketAddr = spec
            .parse()
            .map_err(|_| ConfigError::InvalidListenSpec(spec.to_string()))?;
        Ok(ListenEndpoint::Tcp {
            addr,
            dualstack_ipv6,
        })
    }
}

/// Parses a `--unix-socket-perms`-style octal string (`"600"`, `"0600"`)
/// into a raw mode value.
pub fn parse_octal(value: &str) -> Result<u32, ConfigError> {
    let trimmed = value.strip_prefix('0').unwrap_or(value);
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    u32::from_str_radix(trimmed, 8).map_err(|_| ConfigError::InvalidOctal(value.to_string()))
}

/// The scheduling model a worker process uses to multiplex connections
/// (spec §5): a pool of OS threads, or a single-OS-thread cooperative
/// scheduler ("gevent mode"). Both share the same connection-handling code
/// (spec's design note); what differs is the async runtime flavor the
/// worker process builds, which governs whether handler tasks actually run
/// in parallel across cores or are interleaved cooperatively on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduling {
    /// `max_workers` OS threads may run handlers in parallel.
    Threaded,
    /// A single OS thread interleaves handlers cooperatively. Selected by
    /// default unless `--no-gevent` is given; absence of this mode is never
    /// an error, it just becomes unavailable (spec §5).
    Cooperative,
}

/// A lifecycle hook: an opaque, user-supplied callable invoked at one of
/// the three named points (spec §4.4, §9). The CLI resolves `module:attr`
/// strings to a callable via an external resolver (spec §1, §9) — out of
/// scope for this crate, which only defines the trait object callers
/// invoke. Library users supply their own [`HookSet`] implementation.
pub trait HookSet: Send + Sync + 'static {
    fn before_serve(&self) -> Result<(), String> {
        Ok(())
    }
    fn before_graceful_exit(&self) {}
    fn before_died(&self) {}
}

/// The default hook set: all three points are no-ops.
pub struct NoopHooks;

impl HookSet for NoopHooks {}

/// Assembled server configuration (spec §6's CLI surface, minus the
/// `app`/`--call` resolution, which is the binary's job via its own
/// external resolver).
#[derive(Clone)]
pub struct Config {
    pub listen: Vec<ListenEndpoint>,
    pub subprocess: usize,
    pub scheduling: Scheduling,
    pub max_workers: usize,
    pub watchfiles: Vec<String>,
    pub backlog: i32,
    pub h11_max_incomplete_event_size: Option<usize>,
    pub max_request_pre_process: Option<u64>,
    pub graceful_exit_timeout: Duration,
    pub url_scheme: String,
    pub url_prefix: String,
    pub no_access_log: bool,
    pub hooks: Arc<dyn HookSet>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: vec![ListenEndpoint::Tcp {
                addr: "127.0.0.1:8000".parse().unwrap(),
                dualstack_ipv6: false,
            }],
            subprocess: 0,
            scheduling: Scheduling::Cooperative,
            max_workers: 10,
            watchfiles: Vec::new(),
            backlog: 1024,
            h11_max_incomplete_event_size: None,
            max_request_pre_process: None,
            graceful_exit_timeout: Duration::from_secs(10),
            url_scheme: "http".to_string(),
            url_prefix: std::env::var("SCRIPT_NAME").unwrap_or_default(),
            no_access_log: false,
            hooks: Arc::new(NoopHooks),
        }
    }
}

impl Config {
    pub(crate) fn limits(&self) -> crate::limits::Limits {
        crate::limits::Limits {
            max_headers: 64,
            max_incomplete_event_size: self.h11_max_incomplete_event_size,
            max_body_size: None,
            graceful_exit_timeout: self.graceful_exit_timeout,
            max_request_pre_process: self.max_request_pre_process,
            max_workers: self.max_workers,
        }
    }
}

/// A naive glob matcher supporting a single `*` wildcard per segment,
/// enough to match the common `--watchfiles` patterns (`*.py`, `src/**`)
/// without pulling in a dedicated glob crate for one CLI flag.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    if pattern == "**" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("**/") {
        return candidate.ends_with(suffix) || glob_match(suffix, candidate);
    }
    match pattern.split_once('*') {
        None => pattern == candidate,
        Some((prefix, suffix)) => {
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_listen_spec() {
        let ep = ListenEndpoint::parse("127.0.0.1:9000", false, 0o600).unwrap();
        match ep {
            ListenEndpoint::Tcp { addr, .. } => assert_eq!(addr.port(), 9000),
            _ => panic!("expected tcp"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn parses_unix_listen_spec() {
        let ep = ListenEndpoint::parse("unix:/tmp/zibai.sock", false, 0o600).unwrap();
        match ep {
            ListenEndpoint::Unix { path, mode } => {
                assert_eq!(path, PathBuf::from("/tmp/zibai.sock"));
                assert_eq!(mode, 0o600);
            }
            _ => panic!("expected unix"),
        }
    }

    #[test]
    fn rejects_garbage_listen_spec() {
        assert!(ListenEndpoint::parse("not-an-address", false, 0).is_err());
    }

    #[test]
    fn parses_octal_perms() {
        assert_eq!(parse_octal("600").unwrap(), 0o600);
        assert_eq!(parse_octal("0600").unwrap(), 0o600);
        assert!(parse_octal("999").is_err());
    }

    #[test]
    fn glob_matches_simple_patterns() {
        assert!(glob_match("*.py", "app.py"));
        assert!(!glob_match("*.py", "app.rs"));
        assert!(glob_match("**/*.py", "src/nested/app.py"));
        assert!(glob_match("src/main.rs", "src/main.rs"));
    }
}
