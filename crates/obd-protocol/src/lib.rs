//! OBD-II Protocol Implementation
//!
//! This crate provides the PID registry, response decoders and the async
//! request/response session for ELM327-compatible OBD-II adapters.

mod error;
mod pid;
mod protocol;
mod reading;
pub mod registry;
mod session;
mod transport;

pub use error::{DecodeError, ObdError, ResponseError};
pub use pid::{Decoder, PidCode, PidSpec, ECHO_PREFIX_LEN};
pub use protocol::{AdapterOptions, InitStep, ObdProtocol, COMMAND_SETTLE, RESET_SETTLE};
pub use reading::{Reading, Row};
pub use registry::{PidRegistry, PidSelection};
pub use session::{
    first_positive_line, response_lines, Exchange, RawExchange, ReadMode, Session,
    SessionConfig, POSITIVE_RESPONSE, PROMPT,
};
pub use transport::{MockTransport, SerialTransport, Transport};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Added to the service byte in a positive reply
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
}
