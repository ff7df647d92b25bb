//! Customer state machine and task.
//!
//! State transitions flow over a `tokio::sync::watch` channel: the cashier
//! task (the sole writer) pushes a new [`CustomerState`] and the customer
//! task (the sole reader) awaits the change. One sender per slot keeps the
//! update stream single-writer even as the generation occupying that slot
//! changes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelContext;
use crate::logging::StatEvent;
use crate::protocol::SupermarketMessage;
use crate::queue::CloseableQueue;
use crate::register::{Register, Registers};
use crate::scheduler::reschedule;

/// Slot index into the fixed-size customer population array; stable for
/// the process lifetime even as the generation occupying a slot changes,
/// not a growing id space.
pub type CustomerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerState {
    WaitBuy,
    Buy,
    WaitPay,
    Paying,
    Terminated,
    CanExit,
}

/// The per-slot shared handle: a `watch` cell for state transitions plus
/// an atomic requeue counter the reshuffler bumps without taking any lock
/// a customer task might be holding.
pub struct CustomerSlot {
    pub id: CustomerId,
    state_tx: watch::Sender<CustomerState>,
    requeue_count: AtomicU32,
    /// This generation's product count, published so the cashier task can
    /// compute service time without a second lookup table.
    products: AtomicU32,
}

/// Read-only fan-out handle every cashier task holds to reach any
/// customer's state cell by slot index — the customer-side analogue of
/// `Arc<[Register]>`.
pub type CustomerTable = Arc<[Arc<CustomerSlot>]>;

impl CustomerSlot {
    pub fn new(id: CustomerId) -> Arc<Self> {
        let (state_tx, _rx) = watch::channel(CustomerState::WaitBuy);
        Arc::new(Self {
            id,
            state_tx,
            requeue_count: AtomicU32::new(0),
            products: AtomicU32::new(0),
        })
    }

    pub fn set_products(&self, products: u32) {
        self.products.store(products, Ordering::Relaxed);
    }

    pub fn products(&self) -> u32 {
        self.products.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, state: CustomerState) {
        let _ = self.state_tx.send(state);
    }

    pub fn state(&self) -> CustomerState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CustomerState> {
        self.state_tx.subscribe()
    }

    pub fn bump_requeue(&self) {
        self.requeue_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requeue_count(&self) -> u32 {
        self.requeue_count.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.requeue_count.store(0, Ordering::Relaxed);
        self.set_state(CustomerState::WaitBuy);
    }
}

/// The population lock (concurrency model §5, lock #1): the single source
/// of truth for how many customers are currently alive, guarded the way
/// every other shared count in this crate is — a `tokio::sync::Mutex`,
/// never a poisonable `std::sync::Mutex`.
#[derive(Default)]
pub struct PopulationState {
    count: Mutex<u32>,
}

impl PopulationState {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
        }
    }

    pub async fn get(&self) -> u32 {
        *self.count.lock().await
    }

    pub async fn increment(&self) {
        *self.count.lock().await += 1;
    }

    pub async fn decrement(&self) {
        let mut count = self.count.lock().await;
        *count = count.saturating_sub(1);
    }
}

/// Waits for `slot`'s state to become `target`, unless brutal shutdown is
/// requested first. Returns `false` if aborted by `quit`.
async fn wait_for_state(
    rx: &mut watch::Receiver<CustomerState>,
    target: CustomerState,
    cancel: &CancelContext,
) -> bool {
    loop {
        if *rx.borrow() == target {
            return true;
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            _ = cancel.quit() => return false,
        }
    }
}

/// Runs one customer generation end to end: shop, queue, pay, leave.
/// `slot` is reset to `WaitBuy` at the top so a reused slot starts clean.
#[instrument(skip_all, fields(customer = id))]
pub async fn run(
    id: CustomerId,
    slot: Arc<CustomerSlot>,
    buying_time_ms: u64,
    products: u32,
    registers: Registers,
    outbound: Arc<CloseableQueue<SupermarketMessage>>,
    population: Arc<PopulationState>,
    stats_tx: tokio::sync::mpsc::UnboundedSender<StatEvent>,
    cancel: CancelContext,
) {
    slot.reset();
    slot.set_products(products);
    let started = Instant::now();
    slot.set_state(CustomerState::Buy);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(buying_time_ms)) => {}
        _ = cancel.quit() => {
            population.decrement().await;
            return;
        }
    }

    let mut queue_wait_ms = 0u64;

    if products == 0 {
        // Invariant 4: zero-product customers skip the register entirely.
        slot.set_state(CustomerState::Terminated);
    } else {
        let queue_entered = Instant::now();
        let rescheduled = reschedule(&registers, id, &slot, &cancel).await;
        if !rescheduled {
            debug!("reschedule aborted by shutdown");
            population.decrement().await;
            return;
        }

        let mut rx = slot.subscribe();
        if !wait_for_state(&mut rx, CustomerState::Paying, &cancel).await {
            population.decrement().await;
            return;
        }
        queue_wait_ms = queue_entered.elapsed().as_millis() as u64;

        if !wait_for_state(&mut rx, CustomerState::Terminated, &cancel).await {
            population.decrement().await;
            return;
        }
    }

    let message = SupermarketMessage::WantOut(id);
    if outbound.enqueue(message).await.is_err() {
        warn!("outbound queue closed before want_out could be sent");
        population.decrement().await;
        return;
    }

    let mut rx = slot.subscribe();
    if !wait_for_state(&mut rx, CustomerState::CanExit, &cancel).await {
        population.decrement().await;
        return;
    }

    let ms_in_store = started.elapsed().as_millis() as u64;
    let _ = stats_tx.send(StatEvent::CustomerDone {
        customer: id,
        ms_in_store,
        ms_in_queue: queue_wait_ms,
        products_bought: products,
        requeue_count: slot.requeue_count(),
    });

    population.decrement().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_starts_in_wait_buy() {
        let slot = CustomerSlot::new(0);
        assert_eq!(slot.state(), CustomerState::WaitBuy);
    }

    #[test]
    fn reset_clears_requeue_count() {
        let slot = CustomerSlot::new(0);
        slot.bump_requeue();
        slot.bump_requeue();
        assert_eq!(slot.requeue_count(), 2);
        slot.reset();
        assert_eq!(slot.requeue_count(), 0);
        assert_eq!(slot.state(), CustomerState::WaitBuy);
    }

    #[tokio::test]
    async fn wait_for_state_returns_true_on_match() {
        let slot = CustomerSlot::new(0);
        slot.set_state(CustomerState::Buy);
        let mut rx = slot.subscribe();
        let cancel = CancelContext::new();
        assert!(wait_for_state(&mut rx, CustomerState::Buy, &cancel).await);
    }

    #[tokio::test]
    async fn wait_for_state_aborts_on_quit() {
        let slot = CustomerSlot::new(0);
        let mut rx = slot.subscribe();
        let cancel = CancelContext::new();
        cancel.request_quit();
        assert!(!wait_for_state(&mut rx, CustomerState::Paying, &cancel).await);
    }

    #[tokio::test]
    async fn population_state_tracks_increments_and_decrements() {
        let pop = PopulationState::new();
        pop.increment().await;
        pop.increment().await;
        assert_eq!(pop.get().await, 2);
        pop.decrement().await;
        assert_eq!(pop.get().await, 1);
    }

    #[tokio::test]
    async fn zero_products_customer_terminates_without_a_register() {
        let registers: Registers = Arc::from(Vec::<Arc<Register>>::new());
        let outbound = Arc::new(CloseableQueue::new());
        let population = Arc::new(PopulationState::new());
        population.increment().await;
        let (stats_tx, mut stats_rx) = tokio::sync::mpsc::unbounded_channel();
        let slot = CustomerSlot::new(0);
        let cancel = CancelContext::new();

        let inbound_slot = slot.clone();
        let handle = tokio::spawn(async move {
            run(
                0,
                inbound_slot,
                10,
                0,
                registers,
                outbound.clone(),
                population,
                stats_tx,
                cancel,
            )
            .await;
            outbound
        });

        // The customer should send `want_out` and then wait for `get_out`;
        // simulate the inbound receiver's reply.
        tokio::time::sleep(Duration::from_millis(30)).await;
        slot.set_state(CustomerState::CanExit);
        let outbound = handle.await.unwrap();
        let sent = outbound.dequeue().await.unwrap();
        assert_eq!(sent, SupermarketMessage::WantOut(0));
        let event = stats_rx.recv().await.unwrap();
        assert!(matches!(event, StatEvent::CustomerDone { products_bought: 0, .. }));
    }
}
