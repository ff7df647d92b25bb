//! Connect-with-retry and the admission loop.
//!
//! The admission loop is the `supermarket` binary's main task body: it
//! maintains `0 <= population <= cust_cap`, refilling in batches of
//! `cust_batch` once population drops to `cust_cap - cust_batch`, and is
//! the one place that knows about graceful vs. brutal shutdown ordering.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cancel::CancelContext;
use crate::config::SupermarketConfig;
use crate::customer::{self, CustomerTable, PopulationState};
use crate::error::SupermarketError;
use crate::logging::StatEvent;
use crate::protocol::SupermarketMessage;
use crate::queue::CloseableQueue;
use crate::register::Registers;

/// Connects to the Manager's socket, retrying up to `max_attempts` times
/// with `delay_ms` between attempts — unchanged from spec.md §7's
/// transport error handling.
pub async fn connect_with_retry(
    socket_path: &std::path::Path,
    max_attempts: u32,
    delay_ms: u64,
) -> Result<UnixStream, SupermarketError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match UnixStream::connect(socket_path).await {
            Ok(stream) => return Ok(stream),
            Err(err) if attempts >= max_attempts => {
                warn!(error = %err, attempts, "exhausted connection attempts");
                return Err(SupermarketError::ConnectRetriesExhausted { attempts });
            }
            Err(err) => {
                warn!(error = %err, attempt = attempts, "connect failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

struct Slot {
    id: u32,
    handle: Option<JoinHandle<()>>,
}

/// Runs until graceful or brutal shutdown drains the population to zero,
/// admitting fresh customers in batches as slots free up. `customers` is
/// the same slot-indexed table the inbound receiver and reshuffler hold —
/// this loop only ever (re)spawns a task against an existing `CustomerSlot`,
/// it never allocates its own, so a `cust <id> get_out` frame the Manager
/// sends always reaches the generation actually running in that slot.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    config: &SupermarketConfig,
    registers: Registers,
    customers: CustomerTable,
    outbound: Arc<CloseableQueue<SupermarketMessage>>,
    population: Arc<PopulationState>,
    stats_tx: tokio::sync::mpsc::UnboundedSender<StatEvent>,
    cancel: CancelContext,
) {
    let mut slots: Vec<Slot> = (0..config.cust_cap)
        .map(|id| Slot { id, handle: None })
        .collect();

    loop {
        if cancel.quit_requested() {
            break;
        }

        // Reap any generation that finished and fold its slot back into
        // the pool of spawnable slots.
        for entry in slots.iter_mut() {
            if let Some(handle) = &entry.handle {
                if handle.is_finished() {
                    let _ = entry.handle.take().unwrap().await;
                }
            }
        }

        if cancel.close_requested() {
            if population.get().await == 0 {
                break;
            }
        } else {
            let current = population.get().await;
            if current + config.cust_batch <= config.cust_cap || current == 0 {
                admit_batch(
                    config, &mut slots, &customers, &registers, &outbound, &population, &stats_tx,
                    &cancel,
                )
                .await;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(config.supermarket_poll_time_ms)) => {}
            _ = cancel.quit() => break,
        }
    }

    info!("admission loop exiting, draining outstanding customers");
    for entry in slots.iter_mut() {
        if let Some(handle) = entry.handle.take() {
            let _ = handle.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn admit_batch(
    config: &SupermarketConfig,
    slots: &mut [Slot],
    customers: &CustomerTable,
    registers: &Registers,
    outbound: &Arc<CloseableQueue<SupermarketMessage>>,
    population: &Arc<PopulationState>,
    stats_tx: &tokio::sync::mpsc::UnboundedSender<StatEvent>,
    cancel: &CancelContext,
) {
    let mut admitted = 0u32;
    for entry in slots.iter_mut() {
        if admitted >= config.cust_batch {
            break;
        }
        if entry.handle.is_some() {
            continue;
        }
        let Some(slot) = customers.get(entry.id as usize) else {
            continue;
        };

        let mut rng = rand::thread_rng();
        let buying_time_ms = rng.gen_range(10..=config.max_shopping_time_ms.max(10));
        let products = rng.gen_range(0..=config.product_cap);

        population.increment().await;
        let handle = tokio::spawn(customer::run(
            entry.id,
            slot.clone(),
            buying_time_ms,
            products,
            registers.clone(),
            outbound.clone(),
            population.clone(),
            stats_tx.clone(),
            cancel.clone(),
        ));
        entry.handle = Some(handle);
        admitted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::Register;

    #[tokio::test]
    async fn admits_up_to_batch_size_on_first_pass() {
        let config = SupermarketConfig {
            cust_cap: 10,
            cust_batch: 3,
            max_shopping_time_ms: 20,
            product_cap: 0,
            ..SupermarketConfig::default()
        };
        let registers: Registers = Arc::from(vec![Arc::new(Register::new(0, true))]);
        let customers: CustomerTable = (0..config.cust_cap)
            .map(crate::customer::CustomerSlot::new)
            .collect();
        let outbound = Arc::new(CloseableQueue::new());
        let population = Arc::new(PopulationState::new());
        let (stats_tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancelContext::new();

        let mut slots: Vec<Slot> = (0..config.cust_cap).map(|id| Slot { id, handle: None }).collect();

        admit_batch(
            &config,
            &mut slots,
            &customers,
            &registers,
            &outbound,
            &population,
            &stats_tx,
            &cancel,
        )
        .await;

        assert_eq!(population.get().await, 3);
        assert_eq!(slots.iter().filter(|s| s.handle.is_some()).count(), 3);

        cancel.request_quit();
        for entry in slots.iter_mut() {
            if let Some(handle) = entry.handle.take() {
                let _ = handle.await;
            }
        }
    }
}
