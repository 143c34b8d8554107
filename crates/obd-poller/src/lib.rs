//! OBD-II Poller
//!
//! Drives the poll cycle: every configured PID is queried in registry order,
//! the readings are assembled into a row and handed to a sink, until the run
//! is cancelled or the transport fails.

mod poller;

pub use poller::{PollError, PollSummary, Poller, PollerConfig, PollerState, StopReason};
