//! Tracing setup and the statistics sink.
//!
//! `init_logging` mirrors `examples/gjwang-zero_x_infinity/src/logging.rs`'s
//! `init_logging`: a non-blocking rolling file appender plus an optional
//! stdout layer, gated by an `EnvFilter`. The stats sink realizes Design
//! Note §9's "single actor consuming structured events": cashier and
//! customer tasks never open a file themselves, they push a [`StatEvent`]
//! onto an `mpsc::UnboundedSender` and this task is the only writer.

use std::path::Path;

use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::customer::CustomerId;
use crate::register::RegisterId;

/// Initializes the global tracing subscriber. Returns a guard that must be
/// held for the process lifetime — dropping it stops the non-blocking
/// writer thread, per `tracing-appender`'s contract.
pub fn init_logging(log_dir: &Path, log_file: &str, verbose: bool) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = fmt::layer()
        .with_target(false)
        .with_writer(non_blocking)
        .with_ansi(false);
    let stdout_layer = fmt::layer().with_target(false).with_ansi(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}

/// A single fact about a customer or a register, bound for the stats file.
/// Mirrors spec.md §6's statistics table.
#[derive(Debug, Clone)]
pub enum StatEvent {
    CustomerDone {
        customer: CustomerId,
        ms_in_store: u64,
        ms_in_queue: u64,
        products_bought: u32,
        requeue_count: u32,
    },
    CashierServed {
        register: RegisterId,
        customer: CustomerId,
        products: u32,
        service_ms: u64,
    },
    RegisterOpened {
        register: RegisterId,
    },
    RegisterClosed {
        register: RegisterId,
        open_for_ms: u64,
        customers_served: u64,
    },
}

/// Spawns the single stats-sink task. Every line appended to `path` is
/// plain text, one event per line — this is a thin sink, not a
/// log-rotation system (spec.md §1 explicitly keeps rotation out of
/// scope).
pub fn spawn_stats_sink(
    path: std::path::PathBuf,
) -> (mpsc::UnboundedSender<StatEvent>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StatEvent>();

    let handle = tokio::spawn(async move {
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to open stats log");
                return;
            }
        };
        let mut writer = tokio::io::BufWriter::new(file);
        use tokio::io::AsyncWriteExt;

        while let Some(event) = rx.recv().await {
            let line = format_event(&event);
            if let Err(err) = writer.write_all(line.as_bytes()).await {
                tracing::error!(error = %err, "failed to write stats event");
                break;
            }
        }
        let _ = writer.flush().await;
    });

    (tx, handle)
}

fn format_event(event: &StatEvent) -> String {
    match event {
        StatEvent::CustomerDone {
            customer,
            ms_in_store,
            ms_in_queue,
            products_bought,
            requeue_count,
        } => format!(
            "customer {customer} done ms_in_store={ms_in_store} ms_in_queue={ms_in_queue} products={products_bought} requeues={requeue_count}\n"
        ),
        StatEvent::CashierServed {
            register,
            customer,
            products,
            service_ms,
        } => format!(
            "register {register} served customer {customer} products={products} service_ms={service_ms}\n"
        ),
        StatEvent::RegisterOpened { register } => format!("register {register} opened\n"),
        StatEvent::RegisterClosed {
            register,
            open_for_ms,
            customers_served,
        } => format!(
            "register {register} closed open_for_ms={open_for_ms} customers_served={customers_served}\n"
        ),
    }
}
