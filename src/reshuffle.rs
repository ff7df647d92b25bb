//! Periodic load-balancing task (spec.md §4.4).
//!
//! Every tick, each open register's queue is Bernoulli-sampled (one RNG
//! draw per queued customer) and the sampled customers are pulled out and
//! handed back to [`crate::scheduler::reschedule`] — this is how the
//! simulator keeps queues balanced without a customer ever choosing its
//! own register twice in a row. The pull happens via
//! [`crate::queue::CloseableQueue::drain_where`], which removes the whole
//! selection under a single lock acquisition so a concurrent cashier
//! dequeue can't interleave with a half-finished removal.

use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::cancel::CancelContext;
use crate::customer::{CustomerId, CustomerTable};
use crate::register::{Register, Registers};
use crate::scheduler::reschedule;

/// Runs until brutal shutdown is requested. Graceful close does not stop
/// reshuffling — in-flight customers still benefit from load balancing
/// while they drain.
pub async fn run(
    registers: Registers,
    customers: CustomerTable,
    period_ms: u64,
    fraction: f64,
    cancel: CancelContext,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(period_ms)) => {}
            _ = cancel.quit() => return,
        }

        tick(&registers, &customers, fraction, &cancel).await;
    }
}

async fn tick(
    registers: &[Register],
    customers: &CustomerTable,
    fraction: f64,
    cancel: &CancelContext,
) {
    let mut rng = rand::thread_rng();

    for register in registers {
        if !register.is_open() {
            continue;
        }

        let removed: Vec<CustomerId> = register
            .queue
            .drain_where(|_| rng.gen_bool(fraction))
            .await;

        if removed.is_empty() {
            continue;
        }
        debug!(register = register.id, count = removed.len(), "reshuffling");

        for customer_id in removed {
            if let Some(slot) = customers.get(customer_id as usize) {
                slot.bump_requeue();
                reschedule(registers, customer_id, slot, cancel).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::CustomerSlot;

    fn customer_table(n: usize) -> CustomerTable {
        (0..n as u32).map(CustomerSlot::new).collect()
    }

    #[tokio::test]
    async fn fraction_zero_never_moves_anyone() {
        let registers: Registers = Arc::from(vec![Arc::new(Register::new(0, true)), Arc::new(Register::new(1, true))]);
        registers[0].queue.enqueue(0).await.unwrap();
        registers[0].queue.enqueue(1).await.unwrap();
        let customers = customer_table(2);
        let cancel = CancelContext::new();

        tick(&registers, &customers, 0.0, &cancel).await;

        assert_eq!(registers[0].queue.size().await, 2);
        assert_eq!(registers[1].queue.size().await, 0);
        assert_eq!(customers[0].requeue_count(), 0);
    }

    #[tokio::test]
    async fn fraction_one_moves_everyone_and_bumps_requeue_count() {
        let registers: Registers = Arc::from(vec![Arc::new(Register::new(0, true)), Arc::new(Register::new(1, true))]);
        registers[0].queue.enqueue(0).await.unwrap();
        registers[0].queue.enqueue(1).await.unwrap();
        let customers = customer_table(2);
        let cancel = CancelContext::new();

        tick(&registers, &customers, 1.0, &cancel).await;

        assert_eq!(registers[0].queue.size().await, 0);
        assert_eq!(customers[0].requeue_count(), 1);
        assert_eq!(customers[1].requeue_count(), 1);
    }

    #[tokio::test]
    async fn closed_registers_are_skipped() {
        let registers: Registers = Arc::from(vec![Arc::new(Register::new(0, false))]);
        registers[0].queue.enqueue(0).await.unwrap();
        let customers = customer_table(1);
        let cancel = CancelContext::new();

        tick(&registers, &customers, 1.0, &cancel).await;

        assert_eq!(registers[0].queue.size().await, 1);
    }
}
