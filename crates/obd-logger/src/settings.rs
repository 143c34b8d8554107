//! Logger configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `OBD_LOGGER_*` environment variables (`__` separates sections,
//! e.g. `OBD_LOGGER_SERIAL__PORT`), then command-line flags.

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use obd_poller::PollerConfig;
use obd_protocol::{
    AdapterOptions, InitStep, ObdError, ObdProtocol, PidRegistry, PidSelection, ReadMode,
    SessionConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use storage::CsvOptions;

/// Config file looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_NAME: &str = "obd-logger";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "OBD_LOGGER";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub serial: SerialSettings,
    pub session: SessionSettings,
    pub poll: PollSettings,
    pub output: OutputSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            serial: SerialSettings::default(),
            session: SessionSettings::default(),
            poll: PollSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 38400,
            timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitStepSettings {
    pub command: String,
    pub settle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub read_mode: ReadMode,
    pub query_settle_ms: u64,
    pub read_budget: usize,
    pub protocol: ObdProtocol,
    /// Keep spaces in adapter replies (`ATS1`)
    pub spaces: bool,
    /// Send `ATDP` at the end of initialization
    pub describe_protocol: bool,
    /// Replaces the generated initialization sequence entirely
    pub init: Option<Vec<InitStepSettings>>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::Settle,
            query_settle_ms: 300,
            read_budget: 200,
            protocol: ObdProtocol::Auto,
            spaces: false,
            describe_protocol: false,
            init: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Pause between cycles in milliseconds
    pub interval_ms: u64,
    /// PIDs in column order; empty means the default set
    pub pids: Vec<PidSelection>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            pids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub path: PathBuf,
    pub null_marker: String,
    pub timestamp_column: bool,
    pub sync: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        let csv = CsvOptions::default();
        Self {
            path: PathBuf::from("obd_log.csv"),
            null_marker: csv.null_marker,
            timestamp_column: csv.timestamp_column,
            sync: csv.sync,
        }
    }
}

impl Settings {
    /// Load settings from `path` (required) or the default file (optional),
    /// overlaid with environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn registry(&self) -> Result<PidRegistry, ObdError> {
        PidRegistry::from_selection(&self.poll.pids)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.timeout_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        let init = match &self.session.init {
            Some(steps) => steps
                .iter()
                .map(|s| InitStep::new(s.command.clone(), Duration::from_millis(s.settle_ms)))
                .collect(),
            None => AdapterOptions {
                protocol: self.session.protocol,
                spaces: self.session.spaces,
                describe_protocol: self.session.describe_protocol,
            }
            .init_sequence(),
        };

        SessionConfig {
            init,
            read_mode: self.session.read_mode,
            query_settle: Duration::from_millis(self.session.query_settle_ms),
            read_budget: self.session.read_budget,
            read_timeout: self.read_timeout(),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            cycle_interval: Duration::from_millis(self.poll.interval_ms),
        }
    }

    pub fn csv_options(&self) -> CsvOptions {
        CsvOptions {
            null_marker: self.output.null_marker.clone(),
            timestamp_column: self.output.timestamp_column,
            sync: self.output.sync,
        }
    }
}

/// Command-line flags; anything given here overrides file and environment
#[derive(Parser, Debug, Default)]
#[command(version, about = "Poll an ELM327 adapter and log OBD-II PIDs to CSV")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port of the adapter
    #[arg(short, long)]
    pub port: Option<String>,

    #[arg(short, long)]
    pub baud: Option<u32>,

    /// CSV output file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Comma-separated PID codes, in column order
    #[arg(long, value_delimiter = ',')]
    pub pids: Vec<String>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    #[arg(long)]
    pub log_level: Option<String>,

    /// Use a simulated adapter instead of the serial port
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(port) = &self.port {
            settings.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            settings.serial.baud_rate = baud;
        }
        if let Some(output) = &self.output {
            settings.output.path = output.clone();
        }
        if !self.pids.is_empty() {
            settings.poll.pids = self.pids.iter().map(PidSelection::new).collect();
        }
        if let Some(interval) = self.interval_ms {
            settings.poll.interval_ms = interval;
        }
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
    }
}
