//! The worker pool (spec §4.3): multiplexes many accepted connections over
//! a bounded number of concurrently active connection handlers, with
//! graceful-drain semantics.
//!
//! One accept task per listen endpoint feeds a single bounded channel
//! (capacity 1 — spec §4.3's "hard-bounded queueing with backpressure of
//! depth 0-1" option, taken literally rather than the unbounded-queue
//! alternative); the dispatch loop holds a `tokio::sync::Semaphore` permit
//! for the lifetime of each handler, which is what "pauses" accepting once
//! `max_workers` handlers are live — once every permit is out, the
//! dispatch loop's `acquire` simply doesn't resolve, so nothing is pulled
//! off the channel and the accept tasks stall behind the full channel.
//!
//! The scheduling model (threaded vs. cooperative, spec §5) lives one
//! level up, in [`crate::worker::process`]: it's a choice of which `tokio`
//! runtime flavor to build, not something this module needs to know
//! about. Everything below is plain `tokio` task code either way.

use crate::{
    config::Scheduling,
    gateway::Application,
    limits::Limits,
    listen::Listener,
    logging,
    server::connection::{self, ServerIdentity},
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, watch, Semaphore},
    task::JoinSet,
};

/// How many requests this pool invocation processed before returning,
/// reported back to [`crate::worker::process`] so it can decide whether
/// `--max-request-pre-process` has been reached (spec §4.4 step 6).
pub(crate) struct PoolOutcome {
    pub(crate) processed: u64,
}

/// Runs the accept-and-dispatch loop until `graceful_exit` flips to
/// `true`, then drains (spec §4.3's contract: `run(listen_socket, app,
/// graceful_exit_signal)` blocks until draining completes).
///
/// `request_counter` is shared with the caller so it can trigger its own
/// graceful exit once a per-process request budget is reached without this
/// module needing to know about that policy.
pub(crate) async fn run<A: Application>(
    listeners: Vec<Listener>,
    identity: Arc<ServerIdentity>,
    limits: Arc<Limits>,
    app: Arc<A>,
    scheduling: Scheduling,
    mut graceful_exit: watch::Receiver<bool>,
    request_counter: Arc<AtomicU64>,
) -> PoolOutcome {
    let _ = scheduling; // selects the runtime one level up; unused here.
    let (conn_tx, mut conn_rx) = mpsc::channel(1);
    for listener in listeners {
        let tx = conn_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((conn, peer)) => {
                        if tx.send((conn, peer)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(target: logging::DEBUG, error = %err, "accept failed");
                    }
                }
            }
        });
    }
    drop(conn_tx);

    let semaphore = Arc::new(Semaphore::new(limits.max_workers));
    let mut handlers = JoinSet::new();

    loop {
        if *graceful_exit.borrow() {
            break;
        }
        let permit = tokio::select! {
            biased;
            changed = graceful_exit.changed() => {
                if changed.is_err() || *graceful_exit.borrow() {
                    break;
                }
                continue;
            }
            permit = semaphore.clone().acquire_owned() => permit.expect("semaphore never closed"),
        };

        let (conn, peer) = tokio::select! {
            biased;
            changed = graceful_exit.changed() => {
                if changed.is_err() || *graceful_exit.borrow() {
                    drop(permit);
                    break;
                }
                drop(permit);
                continue;
            }
            next = conn_rx.recv() => match next {
                Some(next) => next,
                None => { drop(permit); break; }
            },
        };

        let app = app.clone();
        let identity = identity.clone();
        let limits = limits.clone();
        let request_counter = request_counter.clone();
        let drain_flag = graceful_exit.clone();
        handlers.spawn(async move {
            connection::handle(conn, peer, identity, limits, app, request_counter, move || *drain_flag.borrow()).await;
            drop(permit);
        });
    }

    drain(&mut handlers, limits.graceful_exit_timeout).await;
    PoolOutcome {
        processed: request_counter.load(Ordering::Relaxed),
    }
}

/// Waits for in-flight handlers to finish, bounded by
/// `graceful_exit_timeout` (spec §4.3); anything still running past the
/// deadline is force-aborted. In-flight exchanges are never cancelled
/// mid-request by anything short of this deadline — the timeout applies
/// only to the drain phase as a whole (spec §5).
async fn drain(handlers: &mut JoinSet<()>, timeout: std::time::Duration) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        if handlers.is_empty() {
            return;
        }
        tokio::select! {
            joined = handlers.join_next() => {
                if joined.is_none() {
                    return;
                }
            }
            _ = &mut deadline => {
                tracing::warn!(
                    target: logging::PROCESS,
                    remaining = handlers.len(),
                    "graceful exit timeout reached; aborting remaining connections"
                );
                handlers.shutdown().await;
                return;
            }
        }
    }
}
