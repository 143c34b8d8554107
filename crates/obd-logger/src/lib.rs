//! OBD-II Data Logger
//!
//! Wires configuration, the serial (or simulated) transport, the poller and
//! the CSV sink into one run.

pub mod settings;

use anyhow::{Context, Result};
use obd_poller::{PollSummary, Poller};
use obd_protocol::{MockTransport, PidRegistry, SerialTransport, Session, Transport};
use storage::CsvSink;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub use settings::{Cli, Settings};

/// Exit status after a clean, cancelled run
pub const EXIT_CLEAN: u8 = 0;
/// Exit status for configuration and startup failures
pub const EXIT_STARTUP_FAILURE: u8 = 1;
/// Exit status when the transport failed mid-run
pub const EXIT_TRANSPORT_FAILURE: u8 = 2;

/// Initialize logging. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("Tracing subscriber already installed");
    }
}

/// Cancel `token` on Ctrl+C
pub fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping after the current PID");
                token.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl+C: {}", e),
        }
    });
}

/// Run one logging session until `cancel` fires or the adapter link breaks.
///
/// Startup failures (bad PID list, unavailable port, unwritable output) are
/// returned before any row is written.
pub async fn run(settings: &Settings, dry_run: bool, cancel: CancellationToken) -> Result<PollSummary> {
    let registry = settings.registry().context("invalid PID configuration")?;

    if dry_run {
        info!("Dry run: using a simulated adapter");
        poll(settings, MockTransport::simulated(), registry, cancel).await
    } else {
        let transport = SerialTransport::open(
            &settings.serial.port,
            settings.serial.baud_rate,
            settings.read_timeout(),
        )
        .with_context(|| format!("cannot open adapter on {}", settings.serial.port))?;
        poll(settings, transport, registry, cancel).await
    }
}

async fn poll<T: Transport>(
    settings: &Settings,
    transport: T,
    registry: PidRegistry,
    cancel: CancellationToken,
) -> Result<PollSummary> {
    let sink = CsvSink::open(&settings.output.path, settings.csv_options())
        .with_context(|| format!("cannot create {}", settings.output.path.display()))?;

    let session = Session::new(transport, settings.session_config());
    let mut poller = Poller::new(session, registry, sink, settings.poller_config());
    info!("Logging to {}. Press Ctrl+C to stop.", settings.output.path.display());

    let summary = poller.run(cancel).await.context("poll run aborted")?;
    Ok(summary)
}

/// Map a run result to a process exit status
pub fn exit_status(result: &Result<PollSummary>) -> u8 {
    match result {
        Ok(summary) if summary.is_clean() => EXIT_CLEAN,
        Ok(_) => EXIT_TRANSPORT_FAILURE,
        Err(_) => EXIT_STARTUP_FAILURE,
    }
}
