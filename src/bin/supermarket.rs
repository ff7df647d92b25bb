//! Supermarket binary: CLI entry point wiring config, logging and the
//! Supermarket peer's task assembly.

use std::path::PathBuf;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use osl_supermarket::cancel::CancelContext;
use osl_supermarket::config::{SupermarketConfig, DEFAULT_SUPERMARKET_CONFIG_PATH};
use osl_supermarket::logging::init_logging;

/// Worker-pool host: spawns and manages concurrent shoppers and cash
/// registers, coupled to a Manager over a framed Unix socket.
#[derive(Parser)]
#[command(name = "supermarket")]
#[command(about = "Runs the Supermarket (worker-pool host) peer of the simulator")]
struct Cli {
    /// Path to the INI config file.
    #[arg(short, long, default_value = DEFAULT_SUPERMARKET_CONFIG_PATH)]
    config: PathBuf,

    /// Directory the stats/trace log files are written to.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Enable debug-level tracing.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_dir, "supermarket.trace.log", cli.verbose);

    info!("step 1/3: loading config from {}", cli.config.display());
    let config = match SupermarketConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load config, aborting");
            std::process::exit(1);
        }
    };

    info!(
        num_cashiers = config.num_cashiers,
        cust_cap = config.cust_cap,
        socket = %config.socket_path.display(),
        "step 2/3: config loaded"
    );

    let cancel = CancelContext::new();
    let signal_handle = tokio::spawn(watch_os_signals(cancel.clone()));

    info!("step 3/3: connecting and starting the simulation");
    let result = osl_supermarket::supermarket::run(config, cancel).await;

    signal_handle.abort();
    match result {
        Ok(()) => info!("supermarket exited cleanly"),
        Err(err) => {
            error!(error = %err, "supermarket exited with an error");
            std::process::exit(1);
        }
    }
}

/// Translates incoming OS signals into the process-wide [`CancelContext`]
/// levels: `SIGHUP` requests graceful close, `SIGQUIT`/`SIGINT` request
/// brutal quit. The Manager reaches this same behavior remotely by
/// forwarding a signal to our pid (`crate::manager::signal`); this task is
/// what makes that forwarding meaningful on this side.
async fn watch_os_signals(cancel: CancelContext) {
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGHUP handler");
            return;
        }
    };
    let mut sigquit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGQUIT handler");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                info!("SIGHUP received, requesting graceful shutdown");
                cancel.request_close();
            }
            _ = sigquit.recv() => {
                info!("SIGQUIT received, requesting brutal shutdown");
                cancel.request_quit();
                break;
            }
            _ = sigint.recv() => {
                info!("SIGINT received, requesting brutal shutdown");
                cancel.request_quit();
                break;
            }
            _ = cancel.quit() => break,
        }
    }
}
