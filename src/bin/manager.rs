//! Manager binary: CLI entry point wiring config, logging and the
//! Manager peer's task assembly.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use osl_supermarket::cancel::CancelContext;
use osl_supermarket::config::{ManagerConfig, DEFAULT_MANAGER_CONFIG_PATH};
use osl_supermarket::logging::init_logging;

/// Controller: observes register queue lengths across up to `P`
/// concurrent Supermarket peers and issues open/close commands.
#[derive(Parser)]
#[command(name = "manager")]
#[command(about = "Runs the Manager (controller) peer of the simulator")]
struct Cli {
    /// Path to the INI config file.
    #[arg(short, long, default_value = DEFAULT_MANAGER_CONFIG_PATH)]
    config: PathBuf,

    /// Directory the trace log file is written to.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Enable debug-level tracing.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_dir, "manager.trace.log", cli.verbose);

    info!("step 1/2: loading config from {}", cli.config.display());
    let config = match ManagerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load config, aborting");
            std::process::exit(1);
        }
    };

    info!(
        num_cashiers = config.num_cashiers,
        pool_size = config.manager_pool_size,
        socket = %config.socket_path.display(),
        "step 2/2: config loaded, listening for supermarket connections"
    );

    let cancel = CancelContext::new();
    match osl_supermarket::manager::run(config, cancel).await {
        Ok(()) => info!("manager exited cleanly"),
        Err(err) => {
            error!(error = %err, "manager exited with an error");
            std::process::exit(1);
        }
    }
}
