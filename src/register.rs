//! Register / cashier state and task (spec.md §4.2).
//!
//! `open` is the ground truth of "this register exists right now" (§5);
//! the queue itself is never torn down on close, only drained and left
//! empty, so a later re-open reuses the same `CloseableQueue` — matching
//! `examples/original_source/globals.h`'s append-only register array and
//! the Design Note that queues may outlive an open/close cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, instrument};

use crate::cancel::CancelContext;
use crate::customer::{CustomerId, CustomerState, CustomerTable};
use crate::logging::StatEvent;
use crate::queue::CloseableQueue;
use crate::error::DequeueError;

pub type RegisterId = usize;

#[derive(Default)]
pub struct RegisterStats {
    pub customers_served: AtomicU64,
    pub products_processed: AtomicU64,
}

/// One register slot. Customers hold a `RegisterId` plus a shared
/// `Arc<[Register]>` — never a raw pointer into the array (spec.md §3).
pub struct Register {
    pub id: RegisterId,
    pub queue: Arc<CloseableQueue<CustomerId>>,
    pub open: AtomicBool,
    pub stats: RegisterStats,
}

/// Read-only fan-out handle every customer and background task holds to
/// reach any register — spec.md §3's "customers hold an index and a
/// read-only handle", generalized one level further so the inbound
/// receiver can also hand out its own clone of a single register to a
/// freshly spawned cashier task.
pub type Registers = Arc<[Arc<Register>]>;

impl Register {
    pub fn new(id: RegisterId, open: bool) -> Self {
        Self {
            id,
            queue: Arc::new(CloseableQueue::new()),
            open: AtomicBool::new(open),
            stats: RegisterStats::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Runs one cashier's service loop for as long as its register stays
/// open. `time_per_prod_ms` is the shared config value; `start_time_ms`
/// is drawn once per cashier generation per spec.md §4.2.
#[instrument(skip_all, fields(register = register.id))]
pub async fn cashier_task(
    register: Arc<Register>,
    customers: CustomerTable,
    time_per_prod_ms: u64,
    poll_time_ms: u64,
    stats_tx: tokio::sync::mpsc::UnboundedSender<StatEvent>,
    cancel: CancelContext,
) {
    let start_time_ms = rand::thread_rng().gen_range(20..=80);
    let opened_at = Instant::now();

    loop {
        if cancel.quit_requested() {
            break;
        }
        if !register.is_open() {
            break;
        }

        match register.queue.dequeue_nonblock() {
            Ok(customer_id) => {
                serve(
                    &register,
                    &customers,
                    customer_id,
                    start_time_ms,
                    time_per_prod_ms,
                    &stats_tx,
                    &cancel,
                )
                .await;
            }
            Err(DequeueError::Closed) => break,
            Err(DequeueError::Empty) => {
                if cancel.close_requested() {
                    // Gentle close: nothing left to serve, leave quietly.
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(tokio::time::Duration::from_millis(poll_time_ms)) => {}
                    _ = cancel.quit() => break,
                }
            }
        }
    }

    debug!("cashier task exiting");
    let _ = stats_tx.send(StatEvent::RegisterClosed {
        register: register.id,
        open_for_ms: opened_at.elapsed().as_millis() as u64,
        customers_served: register.stats.customers_served.load(Ordering::Relaxed),
    });
}

async fn serve(
    register: &Register,
    customers: &CustomerTable,
    customer_id: CustomerId,
    start_time_ms: u64,
    time_per_prod_ms: u64,
    stats_tx: &tokio::sync::mpsc::UnboundedSender<StatEvent>,
    cancel: &CancelContext,
) {
    let Some(slot) = customers.get(customer_id as usize) else {
        debug!(customer = customer_id, "serve: unknown customer id, dropping");
        return;
    };
    let products = slot.products();
    slot.set_state(CustomerState::Paying);

    let service_ms = start_time_ms + (products as u64) * time_per_prod_ms;
    tokio::select! {
        _ = tokio::time::sleep(tokio::time::Duration::from_millis(service_ms)) => {}
        _ = cancel.quit() => return,
    }

    slot.set_state(CustomerState::Terminated);

    register.stats.customers_served.fetch_add(1, Ordering::Relaxed);
    register
        .stats
        .products_processed
        .fetch_add(products as u64, Ordering::Relaxed);

    let _ = stats_tx.send(StatEvent::CashierServed {
        register: register.id,
        customer: customer_id,
        products,
        service_ms,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::CustomerSlot;
    use std::time::Duration;

    fn customer_table(n: usize) -> CustomerTable {
        (0..n as u32).map(CustomerSlot::new).collect()
    }

    #[tokio::test]
    async fn cashier_serves_queued_customer_and_sets_terminated() {
        let register = Arc::new(Register::new(0, true));
        let customers = customer_table(1);
        customers[0].set_products(0);
        register.queue.enqueue(0).await.unwrap();

        let (stats_tx, mut stats_rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancelContext::new();

        let mut rx = customers[0].subscribe();
        let task_register = register.clone();
        let task_customers = customers.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            cashier_task(task_register, task_customers, 1, 5, stats_tx, task_cancel).await;
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if *rx.borrow() == CustomerState::Terminated {
                    break;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("customer was never served");

        register.open.store(false, Ordering::SeqCst);
        cancel.request_quit();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(register.stats.customers_served.load(Ordering::Relaxed), 1);
        let event = stats_rx.recv().await.unwrap();
        assert!(matches!(event, StatEvent::CashierServed { customer: 0, .. }));
    }

    #[tokio::test]
    async fn brutal_quit_interrupts_mid_service_sleep() {
        // A long service time (large product count, small poll_time so the
        // dequeue_nonblock/retry interval isn't what's under test) must not
        // delay shutdown: the payment sleep itself has to race `quit`.
        let register = Arc::new(Register::new(0, true));
        let customers = customer_table(1);
        customers[0].set_products(1000);
        register.queue.enqueue(0).await.unwrap();

        let (stats_tx, mut stats_rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancelContext::new();

        let mut rx = customers[0].subscribe();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            cashier_task(register, customers.clone(), 1000, 5, stats_tx, task_cancel).await;
        });

        // Let the cashier pick the customer up and enter its (very long)
        // service sleep before tripping brutal quit.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if *rx.borrow() == CustomerState::Paying {
                    break;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("customer was never picked up for service");

        cancel.request_quit();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("cashier task did not exit promptly on brutal quit")
            .unwrap();

        // Service was interrupted, not completed: no Terminated transition,
        // no served/stats bookkeeping, no CashierServed event (only the
        // task-exit RegisterClosed event is ever sent).
        assert_eq!(*rx.borrow(), CustomerState::Paying);
        while let Ok(event) = stats_rx.try_recv() {
            assert!(
                !matches!(event, StatEvent::CashierServed { .. }),
                "service should have been interrupted before it could report CashierServed"
            );
        }
    }

    #[tokio::test]
    async fn cashier_exits_on_close_when_queue_is_empty() {
        let register = Arc::new(Register::new(0, true));
        let customers = customer_table(0);
        let (stats_tx, _stats_rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancelContext::new();
        cancel.request_close();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            cashier_task(register, customers, 1, 5, stats_tx, cancel),
        )
        .await;
        assert!(result.is_ok());
    }
}
