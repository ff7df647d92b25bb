//! The Manager peer's task assembly.
//!
//! Wires together the accept loop (one connection worker per Supermarket
//! peer) and the signal-forwarding task under one shared [`CancelContext`],
//! the same top-level shape `crate::supermarket::run` uses for the other
//! peer.

pub mod accept;
pub mod policy;
pub mod signal;

use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tracing::info;

use crate::cancel::CancelContext;
use crate::config::ManagerConfig;
use crate::error::ManagerError;

/// Per-connection bookkeeping the Manager holds: which peer pid owns
/// which slot. Unlike the Supermarket side, the Manager never reaches
/// into Supermarket memory — this is the entirety of its state.
pub struct ManagerState {
    pub config: ManagerConfig,
    client_pids: Mutex<Vec<Option<u32>>>,
}

impl ManagerState {
    pub fn new(config: ManagerConfig) -> Self {
        let slots = config.manager_pool_size as usize;
        Self {
            config,
            client_pids: Mutex::new(vec![None; slots]),
        }
    }

    /// Records `pid` for `slot`. Fails if the slot already has a pid
    /// recorded, so the caller can reject and close the connection.
    pub async fn record_pid(&self, slot: usize, pid: u32) -> Result<(), ()> {
        let mut pids = self.client_pids.lock().await;
        match pids.get_mut(slot) {
            Some(entry) if entry.is_none() => {
                *entry = Some(pid);
                Ok(())
            }
            _ => Err(()),
        }
    }

    pub async fn clear_pid(&self, slot: usize) {
        if let Some(entry) = self.client_pids.lock().await.get_mut(slot) {
            *entry = None;
        }
    }

    /// Every pid currently connected, for the signal task to forward to.
    pub async fn snapshot_pids(&self) -> Vec<u32> {
        self.client_pids
            .lock()
            .await
            .iter()
            .filter_map(|p| *p)
            .collect()
    }
}

/// Runs one full Manager process lifetime: bind the socket, run the
/// accept loop and signal task to completion under `cancel`.
pub async fn run(config: ManagerConfig, cancel: CancelContext) -> Result<(), ManagerError> {
    let _ = std::fs::remove_file(&config.socket_path);
    let listener = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), pool_size = config.manager_pool_size, "manager listening");

    let state = Arc::new(ManagerState::new(config));

    let signal_handle = tokio::spawn(signal::run(state.clone(), cancel.clone()));
    let accept_result = accept::run(listener, state, cancel.clone()).await;

    cancel.request_quit();
    let _ = signal_handle.await;

    accept_result
}
