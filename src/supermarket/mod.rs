//! The Supermarket peer's task assembly (spec.md §2/§4.7).
//!
//! Wires together the connect-with-retry + handshake, the register-poll,
//! reshuffle, outbound sender, inbound receiver and admission loop tasks,
//! and runs them to completion under one shared [`CancelContext`].

pub mod admission;
pub mod io;
pub mod poll;

use std::sync::Arc;

use tracing::{error, info};

use crate::cancel::CancelContext;
use crate::config::SupermarketConfig;
use crate::customer::PopulationState;
use crate::error::SupermarketError;
use crate::logging::{spawn_stats_sink, StatEvent};
use crate::protocol::{supermarket_handshake, SupermarketMessage};
use crate::queue::CloseableQueue;
use crate::register::{Register, Registers};

/// Runs one full Supermarket process lifetime: connect, handshake, spawn
/// every background task, run the admission loop inline, then wait for a
/// clean teardown. Returns once the connection to the Manager is closed
/// and every spawned task has joined.
pub async fn run(config: SupermarketConfig, cancel: CancelContext) -> Result<(), SupermarketError> {
    let registers: Registers = (0..config.num_cashiers)
        .map(|id| Arc::new(Register::new(id, id == 0)))
        .collect();

    let (stats_tx, stats_handle) = spawn_stats_sink(config.stats_log_path.clone());
    let _ = stats_tx.send(StatEvent::RegisterOpened { register: 0 });

    let population = Arc::new(PopulationState::new());
    let outbound: Arc<CloseableQueue<SupermarketMessage>> = Arc::new(CloseableQueue::new());

    // One slot-indexed table, shared by the inbound receiver (dispatches
    // `get_out` by id), the reshuffler (walks it to bump requeue counts)
    // and the admission loop (spawns/respawns customer tasks against it).
    // A single generation's `CustomerSlot` must never be split across two
    // tables, or a `get_out` frame would land on state no task is reading.
    let customers: crate::customer::CustomerTable = (0..config.cust_cap)
        .map(crate::customer::CustomerSlot::new)
        .collect();

    info!(socket = %config.socket_path.display(), "connecting to manager");
    let mut stream = admission::connect_with_retry(
        &config.socket_path,
        config.max_conn_attempts,
        config.conn_attempt_delay_ms,
    )
    .await?;
    supermarket_handshake(&mut stream).await?;
    info!("handshake complete");

    let (read_half, write_half) = stream.into_split();

    let outbound_handle = tokio::spawn(io::run_outbound(
        write_half,
        outbound.clone(),
        cancel.clone(),
    ));
    let inbound_handle = tokio::spawn(io::run_inbound(
        read_half,
        customers.clone(),
        registers.clone(),
        config.time_per_prod_ms,
        config.cashier_poll_time_ms,
        stats_tx.clone(),
        cancel.clone(),
    ));

    let poll_handle = tokio::spawn(poll::run(
        registers.clone(),
        outbound.clone(),
        config.cashier_poll_time_ms,
        cancel.clone(),
    ));
    let reshuffle_handle = tokio::spawn(crate::reshuffle::run(
        registers.clone(),
        customers.clone(),
        config.reshuffle_period_ms,
        config.reshuffle_fraction,
        cancel.clone(),
    ));

    admission::run(
        &config,
        registers.clone(),
        customers,
        outbound.clone(),
        population.clone(),
        stats_tx.clone(),
        cancel.clone(),
    )
    .await;

    cancel.request_quit();
    outbound.close();

    for handle in [outbound_handle, inbound_handle, poll_handle, reshuffle_handle] {
        if let Err(err) = handle.await {
            error!(error = %err, "background task panicked");
        }
    }
    drop(stats_tx);
    let _ = stats_handle.await;

    Ok(())
}
