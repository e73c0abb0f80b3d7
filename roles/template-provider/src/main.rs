//! Entry point for the `sv2-tp` binary.
//!
//! Parses CLI arguments (optionally merged over a TOML file), connects to
//! the node bridge, and runs the Template Provider until interrupted.

mod args;

use args::process_cli_args;
use std::{process::ExitCode, sync::Arc};
use template_provider::{logging::init_logging, node_ipc, Sv2TemplateProvider};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match process_cli_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.log_file.as_deref());

    let mining = match node_ipc::connect(&config.ipc_connect, &config.datadir) {
        Ok(mining) => mining,
        Err(e) => {
            error!("{}", e);
            error!("Is the node bridge running and listening on its unix socket?");
            return ExitCode::FAILURE;
        }
    };

    let mut tp = match Sv2TemplateProvider::new(Arc::new(mining), config.options()) {
        Ok(tp) => tp,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = tp.start() {
        error!("Unable to start Stratum v2 Template Provider: {}", e);
        return ExitCode::FAILURE;
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received"),
        Err(e) => error!("Unable to listen for interrupt signal: {}", e),
    }

    tp.interrupt();
    tp.stop_threads();
    ExitCode::SUCCESS
}
