//! Register-poll task: the sole channel by which the Manager learns load.
//! Composes `queue_size <q0> <q1> … <q{K-1}>` (`-1` for a closed register)
//! and enqueues it on the outbound queue every `cashier_poll_time_ms`.

use std::sync::Arc;

use crate::cancel::CancelContext;
use crate::protocol::SupermarketMessage;
use crate::queue::CloseableQueue;
use crate::register::{Register, Registers};

pub async fn run(
    registers: Registers,
    outbound: Arc<CloseableQueue<SupermarketMessage>>,
    poll_time_ms: u64,
    cancel: CancelContext,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(poll_time_ms)) => {}
            _ = cancel.quit() => return,
        }

        let mut sizes = Vec::with_capacity(registers.len());
        for register in registers.iter() {
            if register.is_open() {
                sizes.push(register.queue.size().await as i64);
            } else {
                sizes.push(-1);
            }
        }

        if outbound
            .enqueue(SupermarketMessage::QueueSize(sizes))
            .await
            .is_err()
        {
            return;
        }
    }
}
