//! Physical units for quantity-typed cells.

use serde::{Deserialize, Serialize};

/// A unit of measure attached to a numeric value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    pub symbol: String,
    /// Whether clients may display the value with SI prefixes (kHz, MHz, ...).
    pub si_prefix_ok: bool,
}

impl Unit {
    pub fn new(symbol: impl Into<String>, si_prefix_ok: bool) -> Self {
        Self {
            symbol: symbol.into(),
            si_prefix_ok,
        }
    }

    pub fn hertz() -> Self {
        Self::new("Hz", true)
    }

    pub fn decibel() -> Self {
        Self::new("dB", false)
    }

    pub fn dbfs() -> Self {
        Self::new("dBFS", false)
    }

    pub fn second() -> Self {
        Self::new("s", true)
    }

    pub fn degree() -> Self {
        Self::new("deg", false)
    }
}
