//! zibai - a pure-runtime HTTP/1.1 server hosting a synchronous
//! gateway-application callable.
//!
//! Three subsystems do the hard work, leaves first:
//!
//! - [`http::framing`] / [`http::request`] / [`http::response`] — the
//!   byte-level HTTP/1.1 parse/serialize state machine.
//! - [`server::connection`] — the per-connection driver: builds the
//!   [`gateway::Environment`], invokes the [`gateway::Application`], streams
//!   the response honoring framing and keep-alive.
//! - [`worker::pool`] — a bounded concurrent executor multiplexing accepted
//!   connections over a capped number of execution contexts.
//! - [`worker::process`] — hosts one pool per OS process, runs lifecycle
//!   hooks, and honors graceful/quick-exit signals.
//! - [`supervisor`] — the optional multi-process parent: forks workers,
//!   forwards listening sockets, and drives signal-based graceful shutdown,
//!   rolling restart, dynamic resize, and file-watch reload.
//!
//! # Library use
//!
//! Implement [`gateway::Application`] (or just a closure matching its
//! signature) and call [`run_with_app`]:
//!
//! ```no_run
//! use zibai::{config::Config, gateway::{Application, Body, Environment, StartResponse}};
//!
//! fn app(_env: Environment, _start_response: StartResponse<'_>) -> Body {
//!     Body::empty()
//! }
//!
//! fn main() {
//!     zibai::logging::init_default_subscriber();
//!     let config = Config::default();
//!     std::process::exit(zibai::run_with_app(config, app).unwrap_or(1));
//! }
//! ```
//!
//! Resolving a CLI-supplied `module:attr` identifier into an `Application`
//! (and the analogous `--before-*` hook strings into a [`config::HookSet`])
//! is outside this crate's scope — that resolver, the argument parser, and
//! file-watch plumbing are external collaborators the host wires up; see
//! `src/main.rs` for the shipped binary's take on it.

pub mod cli;
pub mod config;
pub(crate) mod demo;
pub(crate) mod errors;
pub mod gateway;
pub mod http {
    pub(crate) mod framing;
    pub mod request;
    pub mod response;
    pub mod types;
}
pub mod limits;
pub mod logging;
pub(crate) mod listen;
pub mod server {
    pub(crate) mod connection;
}
pub mod supervisor;
pub(crate) mod worker;

pub use crate::config::{Config, HookSet, ListenEndpoint, NoopHooks, Scheduling};
pub use crate::errors::ConfigError;
pub use crate::gateway::Application;

/// Runs `app` to completion under `config`: binds the configured listen
/// endpoints, then either serves them directly in the foreground
/// (`config.subprocess == 0`) or hands off to the multi-process supervisor
/// (spec §4.5). Returns the process exit code on success, or the
/// [`ConfigError`] that prevented startup (an invalid listen spec, a bind
/// failure, or `--subprocess > 0` on a platform without `fork()`).
pub fn run_with_app<A: Application>(config: Config, app: A) -> Result<i32, ConfigError> {
    supervisor::run(config, app)
}

#[doc(hidden)]
pub use crate::demo::hello_app;
