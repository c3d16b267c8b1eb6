//! The command-line surface (spec §6 "CLI surface"). Parsing itself is an
//! external collaborator per spec §1 — this module's only job is turning
//! validated flags into a [`crate::config::Config`]; resolving the `app`
//! positional and the `--before-*` hook strings into actual callables is a
//! separate external resolver the binary supplies (spec §9 "Hook callables
//! as strings").

use crate::config::{Config, ListenEndpoint, Scheduling};
use crate::errors::ConfigError;
use clap::Parser;
use std::time::Duration;

/// `clap`-derived CLI, field-for-field the table in spec §6.
#[derive(Parser, Debug)]
#[command(name = "zibai", about = "A pure-runtime HTTP/1.1 gateway server")]
pub struct Cli {
    /// `module:attribute` identifying the gateway application.
    pub app: String,

    /// Invoke the resolved attribute with no arguments to obtain the
    /// actual application (spec §6: `--call`).
    #[arg(long)]
    pub call: bool,

    /// `HOST:PORT` or `unix:PATH`; repeatable.
    #[arg(short = 'l', long = "listen")]
    pub listen: Vec<String>,

    /// Worker process count; 0 runs the sole worker in the foreground.
    #[arg(short = 'p', long, default_value_t = 0)]
    pub subprocess: usize,

    /// Force threaded mode instead of the default cooperative scheduler.
    #[arg(long)]
    pub no_gevent: bool,

    /// Max concurrent handlers per worker.
    #[arg(short = 'w', long, default_value_t = 10)]
    pub max_workers: usize,

    /// Semicolon-separated glob list; reload on match.
    #[arg(long)]
    pub watchfiles: Option<String>,

    /// `listen()` backlog.
    #[arg(long, default_value_t = 1024)]
    pub backlog: i32,

    /// Bind v4+v6 on one socket for IPv6 listen endpoints.
    #[arg(long)]
    pub dualstack_ipv6: bool,

    /// chmod applied to unix listen sockets, as an octal string.
    #[arg(long, default_value = "600")]
    pub unix_socket_perms: String,

    /// Framing event cap, in bytes.
    #[arg(long)]
    pub h11_max_incomplete_event_size: Option<usize>,

    /// Per-worker request budget; the worker starts a graceful exit once
    /// reached.
    #[arg(long)]
    pub max_request_pre_process: Option<u64>,

    /// Drain deadline, in seconds.
    #[arg(long, default_value_t = 10)]
    pub graceful_exit_timeout: u64,

    /// Value exposed to the application as `wsgi.url_scheme`.
    #[arg(long, default_value = "http")]
    pub url_scheme: String,

    /// Value exposed to the application as `SCRIPT_NAME`; defaults to the
    /// `SCRIPT_NAME` environment variable.
    #[arg(long)]
    pub url_prefix: Option<String>,

    /// `module:attr` lifecycle hooks.
    #[arg(long)]
    pub before_serve: Option<String>,
    #[arg(long)]
    pub before_graceful_exit: Option<String>,
    #[arg(long)]
    pub before_died: Option<String>,

    /// Suppress access records.
    #[arg(long)]
    pub no_access_log: bool,
}

impl Cli {
    /// Builds a [`Config`] from validated flags. Does not touch `app` or
    /// the `--before-*` strings — those are resolved by the binary's own
    /// external resolver and fed into the returned `Config`'s `hooks`
    /// field separately (see `src/main.rs`).
    pub fn to_config(&self) -> Result<Config, ConfigError> {
        let unix_socket_perms = crate::config::parse_octal(&self.unix_socket_perms)?;

        let listen = if self.listen.is_empty() {
            vec!["127.0.0.1:8000".to_string()]
        } else {
            self.listen.clone()
        };
        let listen = listen
            .iter()
            .map(|spec| ListenEndpoint::parse(spec, self.dualstack_ipv6, unix_socket_perms))
            .collect::<Result<Vec<_>, _>>()?;

        let watchfiles = self
            .watchfiles
            .as_deref()
            .map(|raw| raw.split(';').map(str::to_string).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let scheduling = if self.no_gevent {
            Scheduling::Threaded
        } else {
            Scheduling::Cooperative
        };

        let url_prefix = self
            .url_prefix
            .clone()
            .unwrap_or_else(|| std::env::var("SCRIPT_NAME").unwrap_or_default());

        Ok(Config {
            listen,
            subprocess: self.subprocess,
            scheduling,
            max_workers: self.max_workers.max(1),
            watchfiles,
            backlog: self.backlog,
            h11_max_incomplete_event_size: self.h11_max_incomplete_event_size,
            max_request_pre_process: self.max_request_pre_process,
            graceful_exit_timeout: Duration::from_secs(self.graceful_exit_timeout),
            url_scheme: self.url_scheme.clone(),
            url_prefix,
            no_access_log: self.no_access_log,
            hooks: std::sync::Arc::new(crate::config::NoopHooks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["zibai", "myapp:application"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.subprocess, 0);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.listen.len(), 1);
    }

    #[test]
    fn splits_watchfiles_on_semicolon() {
        let cli = Cli::parse_from(["zibai", "myapp:application", "--watchfiles", "*.py;*.html"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.watchfiles, vec!["*.py".to_string(), "*.html".to_string()]);
    }

    #[test]
    fn no_gevent_selects_threaded_scheduling() {
        let cli = Cli::parse_from(["zibai", "myapp:application", "--no-gevent"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.scheduling, Scheduling::Threaded);
    }

    #[test]
    fn rejects_bad_listen_spec() {
        let cli = Cli::parse_from(["zibai", "myapp:application", "--listen", "not-an-address"]);
        assert!(cli.to_config().is_err());
    }
}
