//! PID Registry
//!
//! The catalog lists every PID this crate knows how to decode. A [`PidRegistry`]
//! is the ordered, validated subset chosen for a run; its order fixes the
//! column order of every row.

use crate::error::ObdError;
use crate::pid::{Decoder, PidCode, PidSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

struct CatalogEntry {
    code: PidCode,
    label: &'static str,
    decoder: Decoder,
    unit: &'static str,
}

const fn entry(
    parameter: u8,
    label: &'static str,
    decoder: Decoder,
    unit: &'static str,
) -> CatalogEntry {
    CatalogEntry {
        code: PidCode::current(parameter),
        label,
        decoder,
        unit,
    }
}

const TEMPERATURE: Decoder = Decoder::Offset { offset: -40 };
const RAW_BYTE: Decoder = Decoder::Offset { offset: 0 };

const CATALOG: &[CatalogEntry] = &[
    entry(0x05, "Coolant", TEMPERATURE, "°C"),
    entry(0x0F, "Intake Temp", TEMPERATURE, "°C"),
    entry(0x0C, "RPM", Decoder::Word { divisor: 4 }, "rpm"),
    entry(0x0D, "Speed", RAW_BYTE, "km/h"),
    entry(0x11, "TPS", Decoder::Percent, "%"),
    entry(0x04, "Engine Load", Decoder::Percent, "%"),
    entry(0x45, "Relative Throttle", Decoder::Percent, "%"),
    entry(0x49, "Accel Pedal D", Decoder::Percent, "%"),
    entry(0x4A, "Accel Pedal E", Decoder::Percent, "%"),
    entry(
        0x10,
        "MAF",
        Decoder::ScaledWord {
            divisor: 100.0,
            places: 2,
        },
        "g/s",
    ),
    entry(
        0x44,
        "Commanded Equiv Ratio",
        Decoder::ScaledWord {
            divisor: 32768.0,
            places: 3,
        },
        "ratio",
    ),
    entry(0x0E, "Timing Advance", Decoder::TimingAdvance, "°"),
    entry(
        0x42,
        "Control Module Voltage",
        Decoder::ScaledWord {
            divisor: 1000.0,
            places: 2,
        },
        "V",
    ),
    entry(0x0B, "Intake MAP", RAW_BYTE, "kPa"),
    entry(0x1F, "Engine Run Time", Decoder::Word { divisor: 1 }, "s"),
];

/// PIDs polled when none are configured
pub const DEFAULT_PIDS: &[&str] = &["0105", "010C", "0111", "010F"];

impl CatalogEntry {
    fn to_spec(&self) -> PidSpec {
        PidSpec {
            code: self.code,
            label: self.label.to_string(),
            decoder: self.decoder,
            unit: self.unit,
        }
    }
}

/// Look up a code in the catalog
pub fn catalog_lookup(code: PidCode) -> Result<PidSpec, ObdError> {
    CATALOG
        .iter()
        .find(|e| e.code == code)
        .map(CatalogEntry::to_spec)
        .ok_or_else(|| ObdError::UnknownPid(code.to_string()))
}

/// Every catalog PID, in catalog order
pub fn catalog() -> impl Iterator<Item = PidSpec> {
    CATALOG.iter().map(CatalogEntry::to_spec)
}

/// One configured PID, as read from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidSelection {
    /// Four hex characters, any case
    pub code: String,
    /// Column label; the catalog label when omitted
    #[serde(default)]
    pub label: Option<String>,
}

impl PidSelection {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Ordered, duplicate-free set of PIDs polled each cycle
#[derive(Debug, Clone, PartialEq)]
pub struct PidRegistry {
    specs: Vec<PidSpec>,
}

impl PidRegistry {
    /// Build a registry from configured selections, preserving their order.
    ///
    /// An empty selection yields the default set.
    pub fn from_selection(selection: &[PidSelection]) -> Result<Self, ObdError> {
        if selection.is_empty() {
            return Self::default_set();
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(selection.len());
        for item in selection {
            let code: PidCode = item.code.parse()?;
            if !seen.insert(code) {
                return Err(ObdError::DuplicatePid(code.to_string()));
            }
            let mut spec = catalog_lookup(code)?;
            if let Some(label) = &item.label {
                spec.label = label.clone();
            }
            debug!("Registered PID {} as {:?}", spec.code, spec.label);
            specs.push(spec);
        }
        Ok(Self { specs })
    }

    /// Coolant, RPM, throttle position and intake temperature
    pub fn default_set() -> Result<Self, ObdError> {
        let selection: Vec<_> = DEFAULT_PIDS.iter().map(|c| PidSelection::new(*c)).collect();
        Self::from_selection(&selection)
    }

    /// Find a configured PID
    pub fn lookup(&self, code: PidCode) -> Result<&PidSpec, ObdError> {
        self.specs
            .iter()
            .find(|s| s.code == code)
            .ok_or_else(|| ObdError::UnknownPid(code.to_string()))
    }

    pub fn labels(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.label.as_str()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PidSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl<'a> IntoIterator for &'a PidRegistry {
    type Item = &'a PidSpec;
    type IntoIter = std::slice::Iter<'a, PidSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;

    #[test]
    fn test_default_set_order() {
        let registry = PidRegistry::default_set().unwrap();
        assert_eq!(registry.labels(), vec!["Coolant", "RPM", "TPS", "Intake Temp"]);
    }

    #[test]
    fn test_selection_keeps_order_and_labels() {
        let registry = PidRegistry::from_selection(&[
            PidSelection::new("010d"),
            PidSelection::new("0142").with_label("Battery"),
        ])
        .unwrap();
        assert_eq!(registry.labels(), vec!["Speed", "Battery"]);
        assert_eq!(registry.lookup(PidCode::current(0x42)).unwrap().unit, "V");
    }

    #[test]
    fn test_unknown_and_duplicate_pids_rejected() {
        let err = PidRegistry::from_selection(&[PidSelection::new("0146")]).unwrap_err();
        assert!(matches!(err, ObdError::UnknownPid(code) if code == "0146"));

        let err = PidRegistry::from_selection(&[
            PidSelection::new("010C"),
            PidSelection::new("010c"),
        ])
        .unwrap_err();
        assert!(matches!(err, ObdError::DuplicatePid(_)));

        let err = PidRegistry::from_selection(&[PidSelection::new("RPM")]).unwrap_err();
        assert!(matches!(err, ObdError::InvalidPidCode(_)));
    }

    #[test]
    fn test_lookup_outside_configured_set() {
        let registry = PidRegistry::default_set().unwrap();
        assert!(registry.lookup(PidCode::current(0x0D)).is_err());
    }

    #[test]
    fn test_catalog_covers_both_ends_of_range() {
        for spec in catalog() {
            let zeros = format!(
                "{}{}",
                spec.code.echo_prefix(),
                "00".repeat(spec.decoder.data_bytes())
            );
            let ones = format!(
                "{}{}",
                spec.code.echo_prefix(),
                "FF".repeat(spec.decoder.data_bytes())
            );
            assert_eq!(zeros.len(), spec.decoder.response_len());
            assert!(spec.decode(&zeros).is_some(), "{} failed on {}", spec.label, zeros);
            assert!(spec.decode(&ones).is_some(), "{} failed on {}", spec.label, ones);
        }
    }

    #[test]
    fn test_catalog_formulas() {
        let decode = |code: &str, line: &str| {
            catalog_lookup(code.parse().unwrap())
                .unwrap()
                .decode(line)
        };
        assert_eq!(decode("010D", "410D55"), Some(Reading::Integer(85)));
        assert_eq!(decode("010B", "410B65"), Some(Reading::Integer(101)));
        assert_eq!(decode("011F", "411F0102"), Some(Reading::Integer(258)));
        assert_eq!(decode("0142", "414230D4"), Some(Reading::decimal(12.5, 2)));
        assert_eq!(decode("0104", "4104FF"), Some(Reading::decimal(100.0, 1)));
    }
}
