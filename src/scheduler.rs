//! Minimum-queue scheduling (spec.md §4.3).
//!
//! Scans every open register's queue length, picks the shortest (ties to
//! the lowest id), then enqueues — re-validating the chosen register is
//! still open immediately before *and* immediately after the enqueue, so
//! a close that starts draining between the scan and the enqueue can
//! never strand a customer in a closed queue: the pre-enqueue check
//! catches the common case, and the post-enqueue check catches the
//! narrower race where the close's own drain already ran (against the
//! queue's lock) before our enqueue could land in it — in which case we
//! pull the customer back out ourselves and retry the scan, rather than
//! leaving it sitting in a queue nobody is draining anymore. This is the
//! Rust realization of the original source's `find_shortest_queue` scan
//! in `examples/original_source/cashcust.c`, generalized to re-check
//! instead of trusting a snapshot.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::cancel::CancelContext;
use crate::customer::{CustomerId, CustomerSlot, CustomerState};
use crate::register::Register;

/// How long to back off between scans when every register is momentarily
/// closed (e.g. mid-reconfiguration). Not part of the public config
/// surface — this is an internal retry cadence, not a tunable knob.
const RETRY_BACKOFF: Duration = Duration::from_millis(5);

/// Finds the least-loaded open register and enqueues `cust` onto it,
/// setting the customer's state to `WaitPay` as part of the same
/// operation. Returns `false` only if brutal shutdown was requested
/// before a register could be found.
pub async fn reschedule(
    registers: &[Arc<Register>],
    cust: CustomerId,
    slot: &Arc<CustomerSlot>,
    ctx: &CancelContext,
) -> bool {
    loop {
        if ctx.quit_requested() {
            return false;
        }

        let mut best: Option<(usize, usize)> = None; // (queue size, register index)
        for register in registers {
            if !register.is_open() {
                continue;
            }
            let size = register.queue.size().await;
            best = match best {
                None => Some((size, register.id)),
                Some((best_size, best_id)) if size < best_size || (size == best_size && register.id < best_id) => {
                    Some((size, register.id))
                }
                other => other,
            };
        }

        let Some((_, chosen_id)) = best else {
            trace!("no open register found, retrying");
            tokio::select! {
                _ = tokio::time::sleep(RETRY_BACKOFF) => continue,
                _ = ctx.quit() => return false,
            }
        };

        let register = &registers[chosen_id];
        if !register.is_open() {
            // Closed between the scan and here; restart the whole scan.
            continue;
        }

        if register.queue.enqueue(cust).await.is_err() {
            // Closed right as we enqueued; the queue rejects and we retry
            // against a fresh scan rather than losing the customer.
            continue;
        }

        if !register.is_open() {
            // Closed while our enqueue was in flight: a close that flips
            // `open` and drains the queue can complete entirely between the
            // check above and here, in which case our entry landed after
            // the drain and nobody is coming back for it. Pull ourselves
            // back out and retry from a fresh scan. An empty result means
            // someone else already took the entry out (e.g. the register
            // reopened and its new cashier dequeued it first) — that's a
            // resolved outcome, not a stranding, so stop rather than
            // double-scheduling.
            let rescued = register.queue.drain_where(|&id| id == cust).await;
            if rescued.is_empty() {
                return true;
            }
            continue;
        }

        slot.set_state(CustomerState::WaitPay);
        return true;
    }
}
