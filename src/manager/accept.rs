//! Accept loop and per-connection worker.
//!
//! A `tokio::net::UnixListener` accept loop gated by a `tokio::sync::Semaphore`
//! sized to `manager_pool_size`: acquiring a permit before `accept()` bounds
//! the number of concurrently-served Supermarket connections, the async
//! counterpart of a fixed-size thread pool gated by a condvar.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::cancel::CancelContext;
use crate::error::ManagerError;
use crate::protocol::{
    decode_supermarket_message, manager_read_handshake, Frame, ManagerMessage, SupermarketMessage,
};

use super::policy::{Action, ManagerPolicy};
use super::ManagerState;

/// Runs the accept loop until brutal shutdown is requested. Each accepted
/// connection is handed its own array-indexed slot (for `client_pids`
/// bookkeeping) and its own semaphore permit, held for the connection's
/// lifetime so at most `manager_pool_size` connection workers run
/// concurrently.
pub async fn run(
    listener: UnixListener,
    state: Arc<ManagerState>,
    cancel: CancelContext,
) -> Result<(), ManagerError> {
    let semaphore = Arc::new(Semaphore::new(state.config.manager_pool_size as usize));
    let mut next_slot = 0usize;
    let mut handles = Vec::new();

    loop {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.quit() => break,
        };

        let (stream, _addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    drop(permit);
                    continue;
                }
            },
            _ = cancel.quit() => { drop(permit); break; }
        };

        let slot = next_slot;
        next_slot = (next_slot + 1) % state.config.manager_pool_size as usize;

        let worker_state = state.clone();
        let worker_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit: OwnedSemaphorePermit = permit;
            if let Err(err) = connection_worker(stream, slot, worker_state, worker_cancel).await {
                warn!(slot, error = %err, "connection worker exited with an error");
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Runs one Supermarket connection end to end: handshake, then decode and
/// act on frames until the peer disconnects or brutal shutdown fires.
/// Generic over the stream type so it can be driven by an in-memory
/// duplex pipe in tests, matching the style of
/// `crate::supermarket::io::run_inbound`/`run_outbound`.
pub async fn connection_worker<S>(
    stream: S,
    slot: usize,
    state: Arc<ManagerState>,
    cancel: CancelContext,
) -> Result<(), ManagerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let pid = manager_read_handshake(&mut read_half).await?;
    if state.record_pid(slot, pid).await.is_err() {
        warn!(slot, pid, "slot already has a connected pid, rejecting");
        return Ok(());
    }
    ManagerMessage::ConnEstablished
        .encode()
        .write_to(&mut write_half)
        .await?;
    info!(slot, pid, "supermarket connected");

    let policy = ManagerPolicy {
        s1_undercrowded: state.config.undercrowded_cash_treshold,
        s2_overcrowded: state.config.overcrowded_cash_treshold,
    };
    let mut qsize = vec![-1i64; state.config.num_cashiers];

    let result = serve(
        &mut read_half,
        &mut write_half,
        &mut qsize,
        &policy,
        &cancel,
    )
    .await;

    state.clear_pid(slot).await;
    info!(slot, pid, "supermarket disconnected");
    result
}

async fn serve<R, W>(
    reader: &mut R,
    writer: &mut W,
    qsize: &mut Vec<i64>,
    policy: &ManagerPolicy,
    cancel: &CancelContext,
) -> Result<(), ManagerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = Frame::read_from(reader) => frame,
            _ = cancel.quit() => return Ok(()),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        match decode_supermarket_message(&frame) {
            Some(SupermarketMessage::QueueSize(sizes)) => {
                if sizes.len() != qsize.len() {
                    warn!(expected = qsize.len(), got = sizes.len(), "queue_size frame has the wrong register count, dropping");
                    continue;
                }
                *qsize = sizes;
                match policy.evaluate(qsize) {
                    Action::Close(id) => {
                        ManagerMessage::CloseCashier(id)
                            .encode()
                            .write_to(writer)
                            .await?;
                    }
                    Action::Open(id) => {
                        ManagerMessage::OpenCashier(id)
                            .encode()
                            .write_to(writer)
                            .await?;
                    }
                    Action::None => {}
                }
            }
            Some(SupermarketMessage::WantOut(id)) => {
                ManagerMessage::GetOut(id).encode().write_to(writer).await?;
            }
            Some(SupermarketMessage::HelloBoss) | Some(SupermarketMessage::Pid(_)) => {
                debug!("unexpected repeated handshake frame on an established connection, ignoring");
            }
            None => warn!(payload = %frame.payload(), "unrecognized frame, dropping"),
        }
    }
}
