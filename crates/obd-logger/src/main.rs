//! OBD-II Data Logger - Main Entry Point

use clap::Parser;
use obd_logger::{cancel_on_interrupt, exit_status, init_logging, run, Cli, Settings};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::from(obd_logger::EXIT_STARTUP_FAILURE);
        }
    };
    cli.apply(&mut settings);
    init_logging(&settings.log_level);

    info!("=== OBD Logger v{} ===", env!("CARGO_PKG_VERSION"));
    let target = if cli.dry_run { "simulated adapter" } else { settings.serial.port.as_str() };
    info!("Connecting to {}...", target);

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let result = run(&settings, cli.dry_run, cancel).await;
    match &result {
        Ok(summary) => info!("Stopped. {} rows written ({:?})", summary.rows_written, summary.stop),
        Err(e) => error!("{:#}", e),
    }
    ExitCode::from(exit_status(&result))
}
