//! The worker process (spec §4.4): hosts one [`crate::worker::pool`],
//! resets signal dispositions, runs the three lifecycle hooks, and tracks
//! a per-process request counter against `--max-request-pre-process`.
//!
//! Each worker — whether it's the lone foreground process (`subprocess ==
//! 0`) or a fork child the supervisor spawned — builds its own `tokio`
//! runtime after it starts running: the runtime flavor (`current_thread`
//! vs. `multi_thread`) is exactly the threaded/cooperative scheduling
//! choice from spec §5, and building it fresh per worker means a forked
//! child never touches the parent's reactor (see [`crate::supervisor`]'s
//! module docs for why that matters).

use crate::{
    config::{Config, Scheduling},
    gateway::Application,
    limits::Limits,
    listen::{Listener, RawListener},
    logging,
    server::connection::ServerIdentity,
    worker::pool,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::watch;

/// How a worker process ended, reported back to the supervisor (when
/// there is one) or straight to `main` (in the foreground case).
pub(crate) struct ProcessOutcome {
    pub(crate) exit_code: i32,
}

/// Runs one worker process to completion. `ready` is called once the pool
/// is about to start accepting — the supervisor uses that edge to flip a
/// worker's bookkeeping state from STARTING to RUNNING (spec §4.5's
/// rolling-restart step); the foreground (no-supervisor) case simply
/// ignores it.
pub(crate) fn run<A, F>(config: Arc<Config>, app: Arc<A>, raw_listeners: Vec<RawListener>, on_ready: F) -> ProcessOutcome
where
    A: Application,
    F: FnOnce() + Send + 'static,
{
    let runtime = build_runtime(config.scheduling);
    runtime.block_on(run_async(config, app, raw_listeners, on_ready))
}

fn build_runtime(scheduling: Scheduling) -> tokio::runtime::Runtime {
    match scheduling {
        Scheduling::Threaded => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to start the threaded worker runtime"),
        Scheduling::Cooperative => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to start the cooperative worker runtime"),
    }
}

async fn run_async<A, F>(config: Arc<Config>, app: Arc<A>, raw_listeners: Vec<RawListener>, on_ready: F) -> ProcessOutcome
where
    A: Application,
    F: FnOnce() + Send + 'static,
{
    let listeners: Vec<Listener> = match raw_listeners
        .into_iter()
        .map(Listener::from_raw)
        .collect::<std::io::Result<_>>()
    {
        Ok(listeners) => listeners,
        Err(err) => {
            tracing::error!(target: logging::PROCESS, error = %err, "failed to adopt inherited listener");
            return ProcessOutcome { exit_code: 1 };
        }
    };

    let (graceful_tx, graceful_rx) = watch::channel(false);

    // SIGINT: quick exit, skipping drain entirely (spec §4.4 step 2).
    #[cfg(unix)]
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");
    // SIGTERM: sets the graceful-exit flag (spec §4.4 step 2).
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    #[cfg(unix)]
    tokio::spawn({
        let graceful_tx = graceful_tx.clone();
        async move {
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        tracing::info!(target: logging::PROCESS, "SIGINT received; quick exit");
                        std::process::exit(0);
                    }
                    _ = sigterm.recv() => {
                        tracing::info!(target: logging::PROCESS, "SIGTERM received; starting graceful exit");
                        let _ = graceful_tx.send(true);
                    }
                }
            }
        }
    });

    if let Err(message) = config.hooks.before_serve() {
        tracing::error!(target: logging::PROCESS, error = %message, "before_serve hook failed; aborting worker");
        return ProcessOutcome { exit_code: 1 };
    }

    let identity = Arc::new(ServerIdentity {
        server_name: local_server_name(&config),
        server_port: local_server_port(&config),
        url_scheme: config.url_scheme.clone(),
        script_name: config.url_prefix.clone(),
        scheduling: config.scheduling,
        multiprocess: config.subprocess > 0,
        no_access_log: config.no_access_log,
    });

    let limits = Arc::new(config.limits());
    let request_counter = Arc::new(AtomicU64::new(0));

    if let Some(budget) = limits.max_request_pre_process {
        tokio::spawn(watch_request_budget(request_counter.clone(), budget, graceful_tx.clone()));
    }

    on_ready();
    tracing::info!(target: logging::PROCESS, pid = std::process::id(), "worker accepting connections");

    let outcome = pool::run(
        listeners,
        identity,
        limits,
        app,
        config.scheduling,
        graceful_rx,
        request_counter,
    )
    .await;

    tracing::info!(
        target: logging::PROCESS,
        pid = std::process::id(),
        processed = outcome.processed,
        "worker pool drained"
    );

    guard_hook("before_graceful_exit", || config.hooks.before_graceful_exit());
    guard_hook("before_died", || config.hooks.before_died());

    ProcessOutcome { exit_code: 0 }
}

/// Runs a post-drain lifecycle hook, catching a panic instead of letting it
/// abort the worker (spec §7: unlike `before_serve`, a `before_graceful_exit`
/// or `before_died` exception is logged and exit proceeds regardless).
fn guard_hook(name: &'static str, hook: impl FnOnce()) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook)) {
        tracing::error!(
            target: logging::PROCESS,
            hook = name,
            error = %hook_panic_message(&payload),
            "lifecycle hook panicked; exit proceeding"
        );
    }
}

fn hook_panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "hook panicked".to_string()
    }
}

/// Polls the shared request counter and flips the graceful-exit flag once
/// `--max-request-pre-process` is reached, so the worker sets its own
/// drain flag rather than waiting on an external signal (spec §4.4 step 6).
async fn watch_request_budget(counter: Arc<AtomicU64>, budget: u64, graceful_tx: watch::Sender<bool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(50));
    loop {
        interval.tick().await;
        if counter.load(Ordering::Relaxed) >= budget {
            tracing::info!(target: logging::PROCESS, budget, "max-request-pre-process reached; starting graceful exit");
            let _ = graceful_tx.send(true);
            return;
        }
        if graceful_tx.is_closed() {
            return;
        }
    }
}

fn local_server_name(config: &Config) -> String {
    config
        .listen
        .iter()
        .find_map(|ep| match ep {
            crate::config::ListenEndpoint::Tcp { addr, .. } => Some(addr.ip().to_string()),
            #[cfg(unix)]
            crate::config::ListenEndpoint::Unix { .. } => None,
        })
        .unwrap_or_else(|| "localhost".to_string())
}

fn local_server_port(config: &Config) -> u16 {
    config
        .listen
        .iter()
        .find_map(|ep| match ep {
            crate::config::ListenEndpoint::Tcp { addr, .. } => Some(addr.port()),
            #[cfg(unix)]
            crate::config::ListenEndpoint::Unix { .. } => None,
        })
        .unwrap_or(0)
}
