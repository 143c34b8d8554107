//! OBD-II Error Types

use thiserror::Error;

/// Errors that end a session or prevent one from starting
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial device could not be opened
    #[error("Transport unavailable on {port}: {reason}")]
    TransportUnavailable { port: String, reason: String },

    /// Link broke while writing or reading
    #[error("Transport I/O error: {0}")]
    TransportIo(String),

    /// PID code is well formed but not in the catalog
    #[error("Unknown PID {0}")]
    UnknownPid(String),

    /// PID code is not four hex characters
    #[error("Invalid PID code {0:?}: expected 4 hex characters")]
    InvalidPidCode(String),

    /// Same PID configured twice
    #[error("PID {0} configured more than once")]
    DuplicatePid(String),
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::TransportIo(err.to_string())
    }
}

/// Reasons a response line could not be turned into a reading
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Line does not start with the echo prefix of the queried PID
    #[error("expected prefix {expected}, got {line:?}")]
    PrefixMismatch { expected: String, line: String },

    /// Data section is shorter than the formula needs, or has unexpected trailing bytes
    #[error("expected {expected} data bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    /// Odd digit count or a non-hex character in the data section
    #[error("malformed hex data {0:?}")]
    InvalidHex(String),
}

/// Why a query produced no reading this cycle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// No line in the reply carried the positive response prefix
    #[error("no matching response line")]
    NoMatchingResponseLine,

    /// A line matched but the decoder rejected it
    #[error("decode failure: {0}")]
    Decode(#[from] DecodeError),
}
