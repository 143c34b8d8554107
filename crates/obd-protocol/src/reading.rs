//! Decoded readings and per-cycle rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded PID value. The unit is implied by the PID.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reading {
    /// Exact value from an unrounded formula
    Integer(i64),
    /// Value rounded to `places` fractional digits
    Decimal { value: f64, places: u8 },
}

impl Reading {
    /// Round `value` to `places` fractional digits
    pub fn decimal(value: f64, places: u8) -> Self {
        let scale = 10f64.powi(i32::from(places));
        Reading::Decimal {
            value: (value * scale).round() / scale,
            places,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            Reading::Integer(v) => v as f64,
            Reading::Decimal { value, .. } => value,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Reading::Integer(v) => write!(f, "{}", v),
            Reading::Decimal { value, places } => write!(f, "{:.*}", usize::from(places), value),
        }
    }
}

/// One poll cycle: a slot per configured PID in registry order, `None` where the
/// adapter gave no usable reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Capture time, stamped once all slots are filled
    pub captured_at: DateTime<Utc>,
    pub cells: Vec<Option<Reading>>,
}

impl Row {
    pub fn new(captured_at: DateTime<Utc>, cells: Vec<Option<Reading>>) -> Self {
        Self { captured_at, cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of slots holding a reading
    pub fn decoded(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Render cells for display, using `null` for absent slots
    pub fn render(&self, null: &str) -> Vec<String> {
        self.cells
            .iter()
            .map(|cell| match cell {
                Some(reading) => reading.to_string(),
                None => null.to_string(),
            })
            .collect()
    }
}
