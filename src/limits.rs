//! Tunable caps and timeouts for the framing engine, connection handler,
//! and worker pool (spec §4.1, §4.3, §6).
//!
//! Unlike the teacher's fixed-capacity, zero-allocation buffer scheme
//! (`ServerLimits`/`ReqLimits`/`RespLimits`/`Http09Limits`, sized up front so
//! every connection gets a pre-allocated slab), these limits bound a
//! streaming, owned-`Bytes` pipeline: requests and responses are of
//! unbounded (or configurably capped) size, so there is no buffer to
//! pre-size — just caps to enforce as bytes arrive. The teacher's
//! HTTP/0.9-variant, zero-allocation buffer math, and 503-handler-pool
//! knobs have no counterpart in the gateway contract and are dropped (see
//! DESIGN.md).

use crate::http::framing::FramingLimits;
use std::time::Duration;

/// All tunable limits for one worker process, assembled from
/// `crate::config::Config` (spec §6 CLI surface) and shared read-only
/// across every connection it handles.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum number of headers accepted per request (spec doesn't name a
    /// default; `httparse` requires a fixed-size scratch array up front).
    pub max_headers: usize,

    /// `--h11-max-incomplete-event-size`: cap on the size of any single
    /// incomplete event (header block, or a chunk-size line) while still
    /// being assembled. `None` means unbounded (the flag's default).
    pub max_incomplete_event_size: Option<usize>,

    /// Cap on the total accumulated request body size. Exceeding it produces
    /// a 413 (spec §7). Not named in spec §6 as a distinct flag — bounded in
    /// practice by the gateway application reading `wsgi.input` incrementally
    /// rather than the server buffering it all, but a generous cap still
    /// protects against an application that calls `.read()` with no limit.
    pub max_body_size: Option<usize>,

    /// `--graceful-exit-timeout`: bound on how long the worker pool's drain
    /// phase waits for in-flight handlers before forcibly closing remaining
    /// sockets (spec §4.3, §8 scenario 5).
    pub graceful_exit_timeout: Duration,

    /// `--max-request-pre-process`: once a worker process has served this
    /// many requests, it sets its own graceful-exit flag (spec §4.4 step 6).
    pub max_request_pre_process: Option<u64>,

    /// `--max-workers`: the worker pool's bounded concurrency (spec §4.3).
    pub max_workers: usize,
}

impl Limits {
    pub(crate) fn framing_limits(&self) -> FramingLimits {
        FramingLimits {
            max_headers: self.max_headers,
            max_incomplete_event_size: self.max_incomplete_event_size,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_headers: 64,
            max_incomplete_event_size: None,
            max_body_size: None,
            graceful_exit_timeout: Duration::from_secs(10),
            max_request_pre_process: None,
            max_workers: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults_in_spec() {
        let limits = Limits::default();
        assert_eq!(limits.max_workers, 10);
        assert_eq!(limits.graceful_exit_timeout, Duration::from_secs(10));
        assert!(limits.max_incomplete_event_size.is_none());
        assert!(limits.max_request_pre_process.is_none());
    }
}
