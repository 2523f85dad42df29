use clap::Parser;
use screenshot_rotator::{build_config, setup_logging, Cli, PassOutcome, Runner};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    if let Err(e) = setup_logging(args.verbose) {
        eprintln!("Failed to set up logging: {e}");
        std::process::exit(1);
    }

    info!("Starting screenshot-rotator v{}", env!("CARGO_PKG_VERSION"));

    // Validate flags and build the runtime configuration
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    // Operator interrupts are fanned out to the active scheduling pass,
    // which persists partial state before the process exits.
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx.clone());

    let runner = match Runner::new(config, &args, shutdown_tx).await {
        Ok(runner) => runner,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    match runner.run().await {
        Ok(PassOutcome::Completed) => {
            info!("screenshot-rotator finished");
        }
        Ok(PassOutcome::Cancelled) => {
            info!("Operation canceled by user; session saved.");
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to create SIGINT handler: {e}");
                return;
            }
        };
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to create SIGTERM handler: {e}");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
            let _ = shutdown_tx.send(());
        }
    })
}
