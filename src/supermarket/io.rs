//! Outbound sender / inbound receiver.
//!
//! The inbound receiver also owns every register's open/close transition
//! and the cashier task handles — centralizing close-then-rescue here
//! rather than splitting it across the register-poll task or the
//! reschedule call sites.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancel::CancelContext;
use crate::customer::{CustomerState, CustomerTable};
use crate::error::{DequeueError, SupermarketError};
use crate::logging::StatEvent;
use crate::protocol::{decode_manager_message, Frame, ManagerMessage, SupermarketMessage};
use crate::queue::CloseableQueue;
use crate::register::{cashier_task, Registers};
use crate::scheduler::reschedule;

/// Drains the outbound queue onto the wire until it closes or brutal
/// shutdown is requested.
pub async fn run_outbound<W>(
    mut writer: W,
    outbound: Arc<CloseableQueue<SupermarketMessage>>,
    cancel: CancelContext,
) -> Result<(), SupermarketError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            message = outbound.dequeue() => message,
            _ = cancel.quit() => return Ok(()),
        };
        match message {
            Ok(message) => {
                message.encode().write_to(&mut writer).await?;
            }
            Err(DequeueError::Closed) => return Ok(()),
            Err(DequeueError::Empty) => unreachable!("blocking dequeue never reports Empty"),
        }
    }
}

/// Reads frames from the Manager and dispatches them until the
/// connection closes or brutal shutdown is requested.
pub async fn run_inbound<R>(
    mut reader: R,
    customers: CustomerTable,
    registers: Registers,
    time_per_prod_ms: u64,
    cashier_poll_time_ms: u64,
    stats_tx: tokio::sync::mpsc::UnboundedSender<StatEvent>,
    cancel: CancelContext,
) -> Result<(), SupermarketError>
where
    R: AsyncRead + Unpin,
{
    let mut cashier_handles: HashMap<usize, JoinHandle<()>> = HashMap::new();

    // Registers already open at connection time (register 0) need their
    // cashier task spawned here — no `open_cashier` frame will ever arrive
    // for a register that started pre-opened.
    for register in registers.iter() {
        if register.is_open() {
            spawn_cashier(
                register.clone(),
                customers.clone(),
                time_per_prod_ms,
                cashier_poll_time_ms,
                stats_tx.clone(),
                cancel.clone(),
                &mut cashier_handles,
            );
        }
    }

    loop {
        let frame = tokio::select! {
            frame = Frame::read_from(&mut reader) => frame,
            _ = cancel.quit() => break,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };

        match decode_manager_message(&frame) {
            Some(ManagerMessage::ConnEstablished) => {
                debug!("unexpected repeated conn_established, ignoring");
            }
            Some(ManagerMessage::GetOut(id)) => match customers.get(id as usize) {
                Some(slot) => slot.set_state(CustomerState::CanExit),
                None => warn!(customer = id, "get_out for unknown customer id"),
            },
            Some(ManagerMessage::OpenCashier(id)) => {
                open_cashier(
                    id,
                    &registers,
                    &customers,
                    time_per_prod_ms,
                    cashier_poll_time_ms,
                    &stats_tx,
                    &cancel,
                    &mut cashier_handles,
                );
            }
            Some(ManagerMessage::CloseCashier(id)) => {
                close_cashier(id, &registers, &customers, &cancel, &mut cashier_handles).await;
            }
            None => warn!(payload = %frame.payload(), "unrecognized frame, dropping"),
        }
    }

    for (_, handle) in cashier_handles.drain() {
        let _ = handle.await;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn open_cashier(
    id: usize,
    registers: &Registers,
    customers: &CustomerTable,
    time_per_prod_ms: u64,
    cashier_poll_time_ms: u64,
    stats_tx: &tokio::sync::mpsc::UnboundedSender<StatEvent>,
    cancel: &CancelContext,
    cashier_handles: &mut HashMap<usize, JoinHandle<()>>,
) {
    let Some(register) = registers.get(id) else {
        warn!(register = id, "open_cashier for out-of-range register id");
        return;
    };
    if register.is_open() {
        debug!(register = id, "already open, ignoring");
        return;
    }
    register.open.store(true, Ordering::SeqCst);
    spawn_cashier(
        register.clone(),
        customers.clone(),
        time_per_prod_ms,
        cashier_poll_time_ms,
        stats_tx.clone(),
        cancel.clone(),
        cashier_handles,
    );
    let _ = stats_tx.send(StatEvent::RegisterOpened { register: id });
}

#[allow(clippy::too_many_arguments)]
fn spawn_cashier(
    register: Arc<crate::register::Register>,
    customers: CustomerTable,
    time_per_prod_ms: u64,
    cashier_poll_time_ms: u64,
    stats_tx: tokio::sync::mpsc::UnboundedSender<StatEvent>,
    cancel: CancelContext,
    cashier_handles: &mut HashMap<usize, JoinHandle<()>>,
) {
    let id = register.id;
    let handle = tokio::spawn(async move {
        cashier_task(
            register,
            customers,
            time_per_prod_ms,
            cashier_poll_time_ms,
            stats_tx,
            cancel,
        )
        .await;
    });
    cashier_handles.insert(id, handle);
}

async fn close_cashier(
    id: usize,
    registers: &Registers,
    customers: &CustomerTable,
    cancel: &CancelContext,
    cashier_handles: &mut HashMap<usize, JoinHandle<()>>,
) {
    let Some(register) = registers.get(id) else {
        warn!(register = id, "close_cashier for out-of-range register id");
        return;
    };
    if !register.is_open() {
        debug!(register = id, "already closed, ignoring");
        return;
    }
    // Ground truth flips first; any concurrent `reschedule` re-validating
    // `open` after this point will see it's closed and restart its scan.
    register.open.store(false, Ordering::SeqCst);

    let stranded = register.queue.drain_where(|_| true).await;
    for customer_id in stranded {
        if let Some(slot) = customers.get(customer_id as usize) {
            // Invariant 8 (spec.md §8): requeue_count counts removals by
            // the reshuffler *or* by a close event, not just the former.
            slot.bump_requeue();
            reschedule(registers, customer_id, slot, cancel).await;
        }
    }

    // The queue is left in place for a future re-open; only the cashier
    // task handle is joined before we move on (Design Note §9: queue
    // outlives the task handle).
    if let Some(handle) = cashier_handles.remove(&id) {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::CustomerSlot;
    use crate::register::Register;
    use std::time::Duration;

    fn customer_table(n: usize) -> CustomerTable {
        (0..n as u32).map(CustomerSlot::new).collect()
    }

    #[tokio::test]
    async fn outbound_sender_writes_frames_until_closed() {
        let outbound = Arc::new(CloseableQueue::new());
        let (client, mut server) = tokio::io::duplex(4096);
        let cancel = CancelContext::new();

        outbound
            .enqueue(SupermarketMessage::WantOut(3))
            .await
            .unwrap();
        outbound.close();

        run_outbound(client, outbound, cancel).await.unwrap();

        let frame = Frame::read_from(&mut server).await.unwrap();
        assert_eq!(frame.payload(), "cust 3 want_out");
    }

    #[tokio::test]
    async fn inbound_get_out_sets_can_exit() {
        let customers = customer_table(1);
        let registers: Registers = Arc::from(Vec::<Arc<Register>>::new());
        let (mut client, server) = tokio::io::duplex(4096);
        let (stats_tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancelContext::new();

        ManagerMessage::GetOut(0)
            .encode()
            .write_to(&mut client)
            .await
            .unwrap();
        drop(client);

        run_inbound(server, customers.clone(), registers, 1, 5, stats_tx, cancel)
            .await
            .unwrap();

        assert_eq!(customers[0].state(), CustomerState::CanExit);
    }

    #[tokio::test]
    async fn inbound_open_then_close_drains_and_reschedules() {
        let customers = customer_table(1);
        let registers: Registers =
            Arc::from(vec![Arc::new(Register::new(0, true)), Arc::new(Register::new(1, false))]);
        registers[1].open.store(false, Ordering::SeqCst);
        registers[0].queue.enqueue(0).await.unwrap();

        let (mut client, server) = tokio::io::duplex(8192);
        let (stats_tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancelContext::new();

        ManagerMessage::OpenCashier(1)
            .encode()
            .write_to(&mut client)
            .await
            .unwrap();
        ManagerMessage::CloseCashier(0)
            .encode()
            .write_to(&mut client)
            .await
            .unwrap();
        drop(client);

        // Register 1 is left open, so the cashier task `run_inbound` spawns
        // for it stays alive until brutal shutdown; drive that directly
        // rather than closing register 1 too, which would leave the
        // rescheduled customer with nowhere open to land.
        let join_cancel = cancel.clone();
        let handle = tokio::spawn(run_inbound(
            server,
            customers.clone(),
            registers.clone(),
            1,
            5,
            stats_tx,
            cancel,
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registers[1].is_open());
        assert!(!registers[0].is_open());
        // The stranded customer should have been rescheduled onto register 1.
        assert_eq!(registers[1].queue.size().await, 1);
        // ...and the close counts as a requeue (invariant 8).
        assert_eq!(customers[0].requeue_count(), 1);

        join_cancel.request_quit();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run_inbound did not return")
            .unwrap()
            .unwrap();
    }
}
