//! OBD-II PID Definitions and Response Decoding
//!
//! Each PID carries a small decoder variant with its scaling constants. Decoders
//! take the normalised response line and validate the echo prefix and data length
//! themselves, so a stray line from another PID is never misread.

use crate::error::{DecodeError, ObdError};
use crate::mode;
use crate::reading::Reading;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hex characters preceding the data bytes in a positive response ("41" + parameter)
pub const ECHO_PREFIX_LEN: usize = 4;

/// A service + parameter pair such as `010C`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PidCode {
    service: u8,
    parameter: u8,
}

impl PidCode {
    /// Create a code from its raw bytes
    pub const fn new(service: u8, parameter: u8) -> Self {
        Self { service, parameter }
    }

    /// Shorthand for a service 01 (current data) PID
    pub const fn current(parameter: u8) -> Self {
        Self::new(mode::CURRENT_DATA, parameter)
    }

    pub fn service(&self) -> u8 {
        self.service
    }

    pub fn parameter(&self) -> u8 {
        self.parameter
    }

    /// ASCII command sent to the adapter, without the carriage return
    pub fn command(&self) -> String {
        self.to_string()
    }

    /// Prefix a positive reply for this PID starts with, e.g. `410C`
    pub fn echo_prefix(&self) -> String {
        format!(
            "{:02X}{:02X}",
            self.service.wrapping_add(mode::POSITIVE_RESPONSE_OFFSET),
            self.parameter
        )
    }
}

impl fmt::Display for PidCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.service, self.parameter)
    }
}

impl FromStr for PidCode {
    type Err = ObdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bytes = trimmed.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(u8::is_ascii_hexdigit) {
            return Err(ObdError::InvalidPidCode(s.to_string()));
        }
        let service = hex_pair(bytes[0], bytes[1]);
        let parameter = hex_pair(bytes[2], bytes[3]);
        match (service, parameter) {
            (Some(service), Some(parameter)) => Ok(Self::new(service, parameter)),
            _ => Err(ObdError::InvalidPidCode(s.to_string())),
        }
    }
}

impl TryFrom<String> for PidCode {
    type Error = ObdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PidCode> for String {
    fn from(code: PidCode) -> Self {
        code.to_string()
    }
}

/// Decoding formula for one PID, applied to the data bytes A, B, ...
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoder {
    /// A + offset (temperatures use -40, speed and pressure use 0)
    Offset { offset: i64 },
    /// (A*256 + B) / divisor, integer division
    Word { divisor: i64 },
    /// round(A*100/255, 1)
    Percent,
    /// round((A*256 + B) / divisor, places)
    ScaledWord { divisor: f64, places: u8 },
    /// round(A/2 - 64, 1)
    TimingAdvance,
}

impl Decoder {
    /// Number of data bytes the formula consumes
    pub fn data_bytes(&self) -> usize {
        match self {
            Decoder::Offset { .. } | Decoder::Percent | Decoder::TimingAdvance => 1,
            Decoder::Word { .. } | Decoder::ScaledWord { .. } => 2,
        }
    }

    /// Hex characters of a well-formed reply, prefix included
    pub fn response_len(&self) -> usize {
        ECHO_PREFIX_LEN + self.data_bytes() * 2
    }

    /// Decode a response line for `code`.
    ///
    /// The line must start with the code's echo prefix. Data bytes beyond the
    /// expected count are tolerated only when they are zero padding.
    pub fn decode(&self, code: PidCode, line: &str) -> Result<Reading, DecodeError> {
        let bytes = line.trim().as_bytes();
        let expected_prefix = code.echo_prefix();
        if bytes.len() < ECHO_PREFIX_LEN
            || !bytes[..ECHO_PREFIX_LEN].eq_ignore_ascii_case(expected_prefix.as_bytes())
        {
            return Err(DecodeError::PrefixMismatch {
                expected: expected_prefix,
                line: line.trim().to_string(),
            });
        }

        let data = parse_data(&bytes[ECHO_PREFIX_LEN..])?;
        let expected = self.data_bytes();
        if data.len() < expected || data[expected..].iter().any(|&b| b != 0) {
            return Err(DecodeError::Length {
                expected,
                actual: data.len(),
            });
        }

        let a = i64::from(data[0]);
        let word = || a * 256 + i64::from(data[1]);

        let reading = match *self {
            Decoder::Offset { offset } => Reading::Integer(a + offset),
            Decoder::Word { divisor } => Reading::Integer(word() / divisor),
            Decoder::Percent => Reading::decimal(a as f64 * 100.0 / 255.0, 1),
            Decoder::ScaledWord { divisor, places } => {
                Reading::decimal(word() as f64 / divisor, places)
            }
            Decoder::TimingAdvance => Reading::decimal(a as f64 / 2.0 - 64.0, 1),
        };
        Ok(reading)
    }
}

/// A configured PID: code, column label and decoder
#[derive(Debug, Clone, PartialEq)]
pub struct PidSpec {
    pub code: PidCode,
    pub label: String,
    pub decoder: Decoder,
    /// Engineering unit of the decoded value
    pub unit: &'static str,
}

impl PidSpec {
    /// Decode a matched response line, keeping the failure reason
    pub fn try_decode(&self, line: &str) -> Result<Reading, DecodeError> {
        self.decoder.decode(self.code, line)
    }

    /// Decode a matched response line; any failure is `None`
    pub fn decode(&self, line: &str) -> Option<Reading> {
        self.try_decode(line).ok()
    }
}

fn parse_data(hex: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let malformed = || DecodeError::InvalidHex(String::from_utf8_lossy(hex).into_owned());
    if hex.len() % 2 != 0 {
        return Err(malformed());
    }
    hex.chunks_exact(2)
        .map(|pair| hex_pair(pair[0], pair[1]).ok_or_else(malformed))
        .collect()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    Some((nibble(hi)? << 4) | nibble(lo)?)
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RPM: Decoder = Decoder::Word { divisor: 4 };
    const TEMP: Decoder = Decoder::Offset { offset: -40 };

    #[test]
    fn test_pid_code_parse() {
        let code: PidCode = "010c".parse().unwrap();
        assert_eq!(code, PidCode::current(0x0C));
        assert_eq!(code.command(), "010C");
        assert_eq!(code.echo_prefix(), "410C");

        assert!("10C".parse::<PidCode>().is_err());
        assert!("01GC".parse::<PidCode>().is_err());
        assert!("+10C".parse::<PidCode>().is_err());
    }

    #[test]
    fn test_rpm_decode() {
        let code = PidCode::current(0x0C);
        assert_eq!(RPM.decode(code, "410C0000"), Ok(Reading::Integer(0)));
        assert_eq!(RPM.decode(code, "410CFFFF"), Ok(Reading::Integer(16383)));
        // 0x1A2B = 6699, 6699 / 4 = 1674
        assert_eq!(RPM.decode(code, "410C1A2B"), Ok(Reading::Integer(1674)));
    }

    #[test]
    fn test_coolant_temp_decode() {
        let code = PidCode::current(0x05);
        assert_eq!(TEMP.decode(code, "41057A"), Ok(Reading::Integer(82)));
        assert_eq!(TEMP.decode(code, "410500"), Ok(Reading::Integer(-40)));
        assert_eq!(TEMP.decode(code, "4105FF"), Ok(Reading::Integer(215)));
    }

    #[test]
    fn test_throttle_decode() {
        let code = PidCode::current(0x11);
        let tps = Decoder::Percent;
        assert_eq!(tps.decode(code, "411100"), Ok(Reading::decimal(0.0, 1)));
        assert_eq!(tps.decode(code, "4111FF"), Ok(Reading::decimal(100.0, 1)));
        // 0x5A = 90, 90 * 100 / 255 = 35.29
        assert_eq!(tps.decode(code, "41115A"), Ok(Reading::decimal(35.3, 1)));

        // zero padding after the expected byte is tolerated, anything else is not
        assert_eq!(tps.decode(code, "41110000"), Ok(Reading::decimal(0.0, 1)));
        assert_eq!(
            tps.decode(code, "411100FF"),
            Err(DecodeError::Length {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_scaled_word_decode() {
        let maf = Decoder::ScaledWord {
            divisor: 100.0,
            places: 2,
        };
        let code = PidCode::current(0x10);
        // 0x05B6 = 1462
        assert_eq!(maf.decode(code, "411005B6"), Ok(Reading::decimal(14.62, 2)));

        let ratio = Decoder::ScaledWord {
            divisor: 32768.0,
            places: 3,
        };
        let code = PidCode::current(0x44);
        assert_eq!(ratio.decode(code, "41448000"), Ok(Reading::decimal(1.0, 3)));
    }

    #[test]
    fn test_timing_advance_decode() {
        let code = PidCode::current(0x0E);
        let timing = Decoder::TimingAdvance;
        assert_eq!(timing.decode(code, "410E00"), Ok(Reading::decimal(-64.0, 1)));
        assert_eq!(timing.decode(code, "410E95"), Ok(Reading::decimal(10.5, 1)));
    }

    #[test]
    fn test_prefix_enforced_per_pid() {
        let code = PidCode::current(0x05);
        let err = TEMP.decode(code, "41047A").unwrap_err();
        assert!(matches!(err, DecodeError::PrefixMismatch { .. }));
        assert!(TEMP.decode(code, "41").is_err());
    }

    #[test]
    fn test_truncated_and_garbage_lines() {
        let code = PidCode::current(0x0C);
        assert_eq!(
            RPM.decode(code, "410C1A"),
            Err(DecodeError::Length {
                expected: 2,
                actual: 1
            })
        );
        assert!(matches!(
            RPM.decode(code, "410C1AZZ"),
            Err(DecodeError::InvalidHex(_))
        ));
        assert!(matches!(
            RPM.decode(code, "410C1A2"),
            Err(DecodeError::InvalidHex(_))
        ));
        assert!(RPM.decode(code, "410C1A\u{fffd}B").is_err());
    }

    proptest! {
        #[test]
        fn decode_never_panics(line in "\\PC{0,16}") {
            let code = PidCode::current(0x0C);
            let _ = RPM.decode(code, &line);
            let _ = Decoder::Percent.decode(code, &line);
        }

        #[test]
        fn rpm_matches_formula(a in 0u8..=255, b in 0u8..=255) {
            let line = format!("410C{:02X}{:02X}", a, b);
            let expected = (i64::from(a) * 256 + i64::from(b)) / 4;
            prop_assert_eq!(
                RPM.decode(PidCode::current(0x0C), &line),
                Ok(Reading::Integer(expected))
            );
        }
    }
}
