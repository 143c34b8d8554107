//! ELM327 Adapter Configuration
//!
//! Protocol selection and the initialization command sequence. Commands are
//! opaque strings to the session; only their order and settle delays matter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settle delay after `ATZ`; the adapter reboots and prints its banner
pub const RESET_SETTLE: Duration = Duration::from_millis(1000);

/// Settle delay after every other initialization command
pub const COMMAND_SETTLE: Duration = Duration::from_millis(500);

/// Supported OBD-II protocols
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    #[serde(rename = "auto")]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    #[serde(rename = "j1850-pwm")]
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    #[serde(rename = "j1850-vpw")]
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    #[serde(rename = "iso9141-2")]
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    #[serde(rename = "kwp-slow")]
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    #[serde(rename = "kwp-fast")]
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    #[serde(rename = "can-11-500")]
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    #[serde(rename = "can-29-500")]
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    #[serde(rename = "can-11-250")]
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    #[serde(rename = "can-29-250")]
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// Get the ELM327 AT command for this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::J1850Pwm => "ATSP1",
            ObdProtocol::J1850Vpw => "ATSP2",
            ObdProtocol::Iso9141_2 => "ATSP3",
            ObdProtocol::Iso14230_4Kwp => "ATSP4",
            ObdProtocol::Iso14230_4KwpFast => "ATSP5",
            ObdProtocol::Iso15765_4Can11bit500 => "ATSP6",
            ObdProtocol::Iso15765_4Can29bit500 => "ATSP7",
            ObdProtocol::Iso15765_4Can11bit250 => "ATSP8",
            ObdProtocol::Iso15765_4Can29bit250 => "ATSP9",
        }
    }
}

/// One adapter configuration command and the delay to wait after sending it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitStep {
    pub command: String,
    pub settle: Duration,
}

impl InitStep {
    pub fn new(command: impl Into<String>, settle: Duration) -> Self {
        Self {
            command: command.into(),
            settle,
        }
    }
}

/// Options that shape the default initialization sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterOptions {
    pub protocol: ObdProtocol,
    /// Keep spaces between response bytes (`ATS1`); some clones misbehave with `ATS0`
    pub spaces: bool,
    /// Ask the adapter to describe the negotiated protocol (`ATDP`)
    pub describe_protocol: bool,
}

impl AdapterOptions {
    /// Reset, echo off, linefeeds off, spaces, headers off, protocol, optional `ATDP`
    pub fn init_sequence(&self) -> Vec<InitStep> {
        let spaces = if self.spaces { "ATS1" } else { "ATS0" };
        let mut steps = vec![
            InitStep::new("ATZ", RESET_SETTLE),
            InitStep::new("ATE0", COMMAND_SETTLE),
            InitStep::new("ATL0", COMMAND_SETTLE),
            InitStep::new(spaces, COMMAND_SETTLE),
            InitStep::new("ATH0", COMMAND_SETTLE),
            InitStep::new(self.protocol.to_elm_command(), COMMAND_SETTLE),
        ];
        if self.describe_protocol {
            steps.push(InitStep::new("ATDP", COMMAND_SETTLE));
        }
        steps
    }
}
