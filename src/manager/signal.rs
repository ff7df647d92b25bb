//! Signal-to-shutdown-flag translation and peer forwarding.
//!
//! `sigwait`-style: listen for `SIGHUP`/`SIGQUIT`/`SIGINT` on
//! `tokio::signal::unix::signal` per kind in one `select!`, forward
//! `SIGHUP`/`SIGQUIT` to every known client pid via `nix::sys::signal::kill`,
//! and treat `SIGINT` as local-only. This task is the one place concrete OS
//! signal handling lives; everywhere else only sees [`CancelContext`].

use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use crate::cancel::CancelContext;

use super::ManagerState;

/// Listens for `SIGHUP` (graceful), `SIGQUIT` (brutal, forwarded) and
/// `SIGINT` (brutal, not forwarded — matches the original's `else
/// exit(0)` branch) until one fires or brutal shutdown is requested by
/// some other source.
pub async fn run(state: Arc<ManagerState>, cancel: CancelContext) {
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "failed to install SIGHUP handler");
            return;
        }
    };
    let mut sigquit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "failed to install SIGQUIT handler");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                info!("SIGHUP received: requesting graceful shutdown, forwarding to peers");
                cancel.request_close();
                forward(&state, Signal::SIGHUP).await;
            }
            _ = sigquit.recv() => {
                info!("SIGQUIT received: requesting brutal shutdown, forwarding to peers");
                cancel.request_quit();
                forward(&state, Signal::SIGQUIT).await;
                break;
            }
            _ = sigint.recv() => {
                info!("SIGINT received: requesting brutal shutdown");
                cancel.request_quit();
                break;
            }
            _ = cancel.quit() => break,
        }
    }
}

async fn forward(state: &ManagerState, signal: Signal) {
    for pid in state.snapshot_pids().await {
        debug!(pid, ?signal, "forwarding signal to supermarket peer");
        if let Err(err) = kill(Pid::from_raw(pid as i32), signal) {
            warn!(pid, error = %err, "failed to forward signal to peer");
        }
    }
}
